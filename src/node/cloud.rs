//! AWS EC2 backend, driven through the `aws` command line client.

use crate::config::{AwsConfig, HostKind, SshConfig};
use crate::error::{Error, Result};
use crate::node::{prepare_environment, test_environment, HostBackend, RemoteNode, SshNode};
use crate::remote::transfer::run_checked;
use crate::remote::{ExecutionResult, TransferResult};
use log::{debug, info, warn};
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;

/// Polls of the instance state while waiting for it to boot.
const START_POLL_ATTEMPTS: u32 = 40;

const START_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Extra wait after the instance reports `running`, until sshd is up.
const SAFETY_WAIT: Duration = Duration::from_secs(60);

pub struct CloudHost {
    name: String,
    aws: AwsConfig,
    ssh: SshConfig,
    instance: Option<String>,
    node: Option<SshNode>,
}

impl CloudHost {
    pub fn new(name: &str, aws: AwsConfig, ssh: SshConfig) -> Self {
        let instance = aws.instance.clone().filter(|i| !i.trim().is_empty());
        Self {
            name: name.to_string(),
            aws,
            ssh,
            instance,
            node: None,
        }
    }

    pub fn instance_id(&self) -> Option<&str> {
        self.instance.as_deref()
    }

    fn node(&self) -> Result<&SshNode> {
        self.node.as_ref().ok_or_else(|| Error::UnreachableHost {
            host: self.name.clone(),
            reason: "instance has not been started".to_string(),
        })
    }

    fn aws_cli(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("aws");
        cmd.arg("ec2").args(args).args(["--output", "text"]);
        if let Some(region) = &self.aws.region {
            cmd.args(["--region", region]);
        }
        let out = run_checked(cmd, "aws cli")?;
        Ok(out.trim().to_string())
    }

    fn instance_state(&self, instance: &str) -> Result<Option<String>> {
        let out = self.aws_cli(&[
            "describe-instances",
            "--instance-ids",
            instance,
            "--query",
            "Reservations[0].Instances[0].State.Name",
        ])?;
        Ok(parse_aws_text(&out))
    }

    fn first_running_instance(&self) -> Result<Option<String>> {
        let mut filters = vec!["Name=instance-state-name,Values=running".to_string()];
        if let Some(ami) = &self.aws.ami {
            filters.push(format!("Name=image-id,Values=ami-{}", ami));
        }

        let mut args: Vec<&str> = vec!["describe-instances", "--filters"];
        args.extend(filters.iter().map(String::as_str));
        args.extend(["--query", "Reservations[*].Instances[*].InstanceId"]);

        let out = self.aws_cli(&args)?;
        Ok(out.split_whitespace().next().and_then(parse_aws_text))
    }

    fn instance_addresses(&self, instance: &str) -> Result<(String, String)> {
        let public = self.aws_cli(&[
            "describe-instances",
            "--instance-ids",
            instance,
            "--query",
            "Reservations[0].Instances[0].PublicIpAddress",
        ])?;
        let private = self.aws_cli(&[
            "describe-instances",
            "--instance-ids",
            instance,
            "--query",
            "Reservations[0].Instances[0].PrivateIpAddress",
        ])?;

        let public = parse_aws_text(&public).ok_or_else(|| {
            Error::Backend(format!("instance {} has no public IP address", instance))
        })?;
        Ok((public, parse_aws_text(&private).unwrap_or_default()))
    }

    fn wait_until_running(&self, instance: &str) -> Result<()> {
        for attempt in 1..=START_POLL_ATTEMPTS {
            if self.instance_state(instance)?.as_deref() == Some("running") {
                return Ok(());
            }
            debug!(
                "Instance {} is not yet running (poll {}/{})",
                instance, attempt, START_POLL_ATTEMPTS
            );
            thread::sleep(START_POLL_INTERVAL);
        }
        Err(Error::Backend(format!("Instance {} cannot be started", instance)))
    }
}

/// `aws --output text` prints `None` for missing values.
pub fn parse_aws_text(out: &str) -> Option<String> {
    let value = out.trim();
    if value.is_empty() || value == "None" {
        None
    } else {
        Some(value.to_string())
    }
}

impl RemoteNode for CloudHost {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HostKind {
        HostKind::Aws
    }

    fn run(&self, command: &str) -> Result<ExecutionResult> {
        self.node()?.run(command)
    }

    fn send_file(&self, local_path: &Path, remote_path: &str) -> Result<TransferResult> {
        self.node()?.send_file(local_path, remote_path)
    }

    fn retrieve_file(&self, remote_path: &str, local_path: &Path) -> Result<TransferResult> {
        self.node()?.retrieve_file(remote_path, local_path)
    }

    fn is_reachable(&self) -> bool {
        self.node.as_ref().is_some_and(|n| n.is_reachable())
    }

    fn public_address(&self) -> String {
        self.node.as_ref().map(|n| n.public_address()).unwrap_or_default()
    }

    fn private_address(&self) -> String {
        self.node.as_ref().map(|n| n.private_address()).unwrap_or_default()
    }

    fn user(&self) -> String {
        self.ssh.user.clone()
    }

    fn port(&self) -> u16 {
        self.ssh.port
    }
}

impl HostBackend for CloudHost {
    fn create(&mut self) -> Result<()> {
        if let Some(instance) = &self.instance {
            match self.instance_state(instance)?.as_deref() {
                None | Some("terminated") | Some("shutting-down") => {
                    info!("Instance {} is gone, creating a new one", instance);
                }
                Some(_) => {
                    info!("Reusing instance {}", instance);
                    return Ok(());
                }
            }
        }

        let ami = self.aws.ami.as_deref().ok_or_else(|| Error::Config("No AMI specified".to_string()))?;
        let key_pair = self.aws.key_pair.as_deref().ok_or_else(|| {
            Error::Config("No AWS keypair specified".to_string())
        })?;
        let security_group = self.aws.security_group.as_deref().ok_or_else(|| {
            Error::Config("No security group specified".to_string())
        })?;

        info!("Creating {} instance from ami-{}", self.aws.instance_type, ami);
        let image = format!("ami-{}", ami);
        let out = self.aws_cli(&[
            "run-instances",
            "--image-id",
            &image,
            "--instance-type",
            &self.aws.instance_type,
            "--key-name",
            key_pair,
            "--security-group-ids",
            security_group,
            "--count",
            "1",
            "--query",
            "Instances[0].InstanceId",
        ])?;

        let instance = parse_aws_text(&out)
            .ok_or_else(|| Error::Backend("run-instances returned no instance id".to_string()))?;
        info!("Created instance {}", instance);
        self.instance = Some(instance);
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        let instance = match self.instance.clone() {
            Some(instance) => instance,
            None => self.first_running_instance()?.ok_or_else(|| {
                Error::Config(format!(
                    "No instance configured or running for {}; enable the create step",
                    self.name
                ))
            })?,
        };

        if self.instance_state(&instance)?.as_deref() != Some("running") {
            info!("Waiting for instance {}...", instance);
            self.aws_cli(&["start-instances", "--instance-ids", &instance])?;
            self.wait_until_running(&instance)?;

            info!("Waiting {} more seconds for safety...", SAFETY_WAIT.as_secs());
            thread::sleep(SAFETY_WAIT);
        }

        let (public, private) = self.instance_addresses(&instance)?;
        info!(
            "{} is accessible at {} (private IP: {})",
            instance, public, private
        );

        self.node = Some(SshNode::new(
            self.name.clone(),
            HostKind::Aws,
            public,
            private,
            self.ssh.clone(),
        ));
        self.instance = Some(instance);
        Ok(())
    }

    fn prepare(&mut self) -> Result<()> {
        prepare_environment(self.node()?)
    }

    fn test(&mut self) -> Result<()> {
        test_environment(self.node()?)
    }

    fn destroy(&mut self) -> Result<()> {
        let Some(instance) = self.instance.clone() else {
            warn!("{} has no instance to stop", self.name);
            return Ok(());
        };

        if self.instance_state(&instance)?.as_deref() == Some("running") {
            self.aws_cli(&["stop-instances", "--instance-ids", &instance])?;
            info!("Stopped instance {}", instance);
        }
        self.node = None;
        Ok(())
    }

    fn as_node(&self) -> &dyn RemoteNode {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aws_config() -> AwsConfig {
        AwsConfig {
            ami: Some("123".to_string()),
            instance: Some("  ".to_string()),
            instance_type: "t2.micro".to_string(),
            key_pair: None,
            security_group: None,
            region: None,
        }
    }

    #[test]
    fn test_parse_aws_text() {
        assert_eq!(parse_aws_text(" i-0abc \n"), Some("i-0abc".to_string()));
        assert_eq!(parse_aws_text("None"), None);
        assert_eq!(parse_aws_text(""), None);
    }

    #[test]
    fn test_blank_instance_is_ignored() {
        let host = CloudHost::new("source", aws_config(), SshConfig::default());
        assert!(host.instance_id().is_none());
    }

    #[test]
    fn test_unstarted_instance_is_unreachable() {
        let host = CloudHost::new("source", aws_config(), SshConfig::default());
        assert!(!host.is_reachable());
        assert_eq!(host.public_address(), "");
        assert!(matches!(
            host.run("true"),
            Err(Error::UnreachableHost { .. })
        ));
    }
}
