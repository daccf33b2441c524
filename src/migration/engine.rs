//! Docker commands used for checkpoint, restore and workload containers.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::capability::Endpoint;
use crate::error::{Error, Result};

fn q(s: &str) -> String {
    shell_words::quote(s).into_owned()
}

pub fn is_running_command(sudo: &str, container: &str) -> String {
    format!(
        "{}docker inspect --format '{{{{.State.Running}}}}' {}",
        sudo,
        q(container)
    )
}

pub fn checkpoint_command(sudo: &str, container: &str, dir: &str, name: &str) -> String {
    format!(
        "{sudo}mkdir -p {dir} && {sudo}docker checkpoint create --checkpoint-dir={dir} {container} {name}",
        sudo = sudo,
        dir = q(dir),
        container = q(container),
        name = q(name)
    )
}

/// Lets the login user read a checkpoint written by the daemon.
pub fn open_permissions_command(sudo: &str, path: &str) -> String {
    format!("{}chmod -R a+rwX {}", sudo, q(path))
}

/// Makes `dir` writable for incoming checkpoints.
pub fn import_dir_command(sudo: &str, dir: &str) -> String {
    format!("{sudo}mkdir -p {dir} && {sudo}chmod 777 {dir}", sudo = sudo, dir = q(dir))
}

pub fn restore_command(sudo: &str, container: &str, dir: &str, name: &str) -> String {
    format!(
        "{}docker start --checkpoint-dir={} --checkpoint={} {}",
        sudo,
        q(dir),
        q(name),
        q(container)
    )
}

pub fn remove_path_command(sudo: &str, path: &str) -> String {
    format!("{}rm -rf {}", sudo, q(path))
}

/// Reports whether `container` is running on the endpoint's host.
///
/// A container that does not exist counts as not running.
pub fn container_is_running(endpoint: Endpoint<'_>, container: &str) -> Result<bool> {
    let result = endpoint
        .node
        .run(&is_running_command(endpoint.sudo(), container))?;
    Ok(result.is_success() && result.stdout.lines().any(|l| l.trim() == "true"))
}

/// What to run inside the migrated container.
///
/// Deserialized from `type: command` or `type: image` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MigrationSpec {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    /// Extra `docker run`/`docker create` options for image workloads
    #[serde(default)]
    pub options: Option<String>,
}

impl MigrationSpec {
    pub fn command(name: &str, command: &str) -> Self {
        Self {
            kind: "command".to_string(),
            name: name.to_string(),
            command: Some(command.to_string()),
            image: None,
            options: None,
        }
    }

    pub fn image(name: &str, image: &str, options: Option<&str>) -> Self {
        Self {
            kind: "image".to_string(),
            name: name.to_string(),
            command: None,
            image: Some(image.to_string()),
            options: options.map(str::to_string),
        }
    }

    /// Checks the type and turns it into a workload.
    pub fn workload(&self) -> Result<Workload> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("Migration needs a container name".to_string()));
        }
        match self.kind.as_str() {
            "command" => {
                let command = self
                    .command
                    .as_deref()
                    .filter(|c| !c.trim().is_empty())
                    .ok_or_else(|| Error::Config("Migration type `command` needs a command".to_string()))?;
                Ok(Workload::Command {
                    name: self.name.clone(),
                    command: command.to_string(),
                })
            }
            "image" => {
                let image = self
                    .image
                    .as_deref()
                    .filter(|i| !i.trim().is_empty())
                    .ok_or_else(|| Error::Config("Migration type `image` needs an image".to_string()))?;
                let options = match self.options.as_deref() {
                    Some(opts) => shell_words::split(opts).map_err(|e| {
                        Error::Config(format!("Cannot parse docker options `{}`: {}", opts, e))
                    })?,
                    None => Vec::new(),
                };
                Ok(Workload::Image {
                    name: self.name.clone(),
                    image: image.to_string(),
                    options,
                })
            }
            other => Err(Error::Config(format!(
                "Unsupported migration type `{}` (expected `command` or `image`)",
                other
            ))),
        }
    }
}

/// A validated migration workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Workload {
    /// A shell command run in the base image
    Command { name: String, command: String },
    /// A ready-made image with extra docker options
    Image {
        name: String,
        image: String,
        options: Vec<String>,
    },
}

impl Workload {
    pub fn name(&self) -> &str {
        match self {
            Workload::Command { name, .. } | Workload::Image { name, .. } => name,
        }
    }

    /// `docker run -d` (when `start`) or `docker create` for this workload.
    pub fn container_command(&self, sudo: &str, base_image: &str, start: bool) -> String {
        let verb = if start { "run -d" } else { "create" };
        match self {
            Workload::Command { name, command } => format!(
                "{}docker {} --name {} {} sh -c {}",
                sudo,
                verb,
                q(name),
                q(base_image),
                q(command)
            ),
            Workload::Image {
                name,
                image,
                options,
            } => {
                let mut parts = vec![format!("{}docker {} --name {}", sudo, verb, q(name))];
                parts.extend(options.iter().map(|o| q(o)));
                parts.push(q(image));
                parts.join(" ")
            }
        }
    }

    /// Starts the workload on `source` and creates it, stopped, on
    /// `destination`, replacing leftovers from earlier runs.
    pub fn deploy(
        &self,
        source: Endpoint<'_>,
        destination: Endpoint<'_>,
        base_image: &str,
    ) -> Result<()> {
        for (endpoint, start) in [(source, true), (destination, false)] {
            let sudo = endpoint.sudo();
            endpoint.node.execute(&format!(
                "{}docker rm -f {} >/dev/null 2>&1 || true",
                sudo,
                q(self.name())
            ))?;
            let command = self.container_command(sudo, base_image, start);
            debug!("[{}] {}", endpoint.node.name(), command);
            endpoint.node.execute(&command)?;
        }
        info!(
            "Container {} running on {} and created on {}",
            self.name(),
            source.node.name(),
            destination.node.name()
        );
        Ok(())
    }

    /// Removes the workload container from both hosts; failures are logged.
    pub fn remove(&self, hosts: &[Endpoint<'_>]) {
        for endpoint in hosts {
            let command = format!("{}docker rm -f {}", endpoint.sudo(), q(self.name()));
            if let Err(e) = endpoint.node.execute(&command) {
                warn!(
                    "Could not remove container {} on {}: {}",
                    self.name(),
                    endpoint.node.name(),
                    e
                );
            }
        }
    }
}
