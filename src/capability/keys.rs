//! SSH key injection between the two hosts.

use log::debug;

use crate::error::{Error, Result};
use crate::node::RemoteNode;

const KEYGEN: &str = "mkdir -p ~/.ssh && chmod 700 ~/.ssh && \
     (test -f ~/.ssh/id_rsa || ssh-keygen -q -t rsa -b 4096 -N '' -f ~/.ssh/id_rsa) && \
     cat ~/.ssh/id_rsa.pub";

/// Makes sure `from` has a key pair and authorizes its public key on `to`.
pub fn inject_key(from: &dyn RemoteNode, to: &dyn RemoteNode) -> Result<()> {
    let output = from.execute(KEYGEN)?;
    let key = public_key_line(&output).ok_or_else(|| {
        Error::Backend(format!("{} did not report an ssh public key", from.name()))
    })?;
    debug!("Authorizing key of {} on {}", from.name(), to.name());

    let quoted = shell_words::quote(key);
    to.execute(&format!(
        "mkdir -p ~/.ssh && chmod 700 ~/.ssh && \
         (grep -qxF {key} ~/.ssh/authorized_keys 2>/dev/null || echo {key} >> ~/.ssh/authorized_keys) && \
         chmod 600 ~/.ssh/authorized_keys",
        key = quoted
    ))?;
    Ok(())
}

fn public_key_line(output: &str) -> Option<&str> {
    output
        .lines()
        .map(str::trim)
        .rev()
        .find(|line| line.starts_with("ssh-") || line.starts_with("ecdsa-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::testing::ScriptedNode;

    #[test]
    fn test_public_key_line_skips_noise() {
        let out = "Generating public/private rsa key pair.\nssh-rsa AAAA user@host\n";
        assert_eq!(public_key_line(out), Some("ssh-rsa AAAA user@host"));
        assert_eq!(public_key_line("nothing here"), None);
    }

    #[test]
    fn test_inject_key_requires_a_key() {
        let from = ScriptedNode::new("source", "10.0.0.1");
        let to = ScriptedNode::new("destination", "10.0.0.2");
        assert!(inject_key(&from, &to).is_err());
        assert!(to.commands().is_empty());
    }

    #[test]
    fn test_inject_key_is_idempotent_on_target() {
        let from = ScriptedNode::new("source", "10.0.0.1").respond("id_rsa.pub", "ssh-ed25519 KEY a@b");
        let to = ScriptedNode::new("destination", "10.0.0.2");
        inject_key(&from, &to).unwrap();
        let commands = to.commands();
        assert_eq!(commands.len(), 1);
        assert!(commands[0].contains("grep -qxF 'ssh-ed25519 KEY a@b'"));
    }
}
