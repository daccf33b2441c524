//! Path helpers and shell command builders for archive-mode transfers.

use crate::capability::ArchiveFormat;

/// A source ending in `/` or `*` names the contents of a directory.
pub fn is_directory_style(path: &str) -> bool {
    path.ends_with('/') || path.ends_with('*')
}

/// `path` without directory markers and trailing slashes.
pub fn strip_directory_marker(path: &str) -> &str {
    let trimmed = path.trim_end_matches('*').trim_end_matches('/');
    if trimmed.is_empty() && path.starts_with('/') {
        "/"
    } else {
        trimmed
    }
}

/// Splits a POSIX path into parent directory and final component.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rsplit_once('/') {
        Some(("", base)) => ("/", base),
        Some((parent, base)) => (parent, base),
        None => (".", path),
    }
}

/// True if `path` already has a compressed extension from `skip`.
pub fn should_skip(path: &str, skip: &[String]) -> bool {
    let (_, base) = split_path(strip_directory_marker(path));
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => {
            skip.iter().any(|s| s.trim_start_matches('.').eq_ignore_ascii_case(ext))
        }
        _ => false,
    }
}

/// Packs `source` (its final component, relative to its parent) into
/// `archive` on the sending host.
pub fn pack_command(format: ArchiveFormat, source: &str, archive: &str) -> String {
    let (parent, base) = split_path(source);
    let tool = match format {
        ArchiveFormat::Tar => format!("tar -cf {} {}", q(archive), q(base)),
        ArchiveFormat::Zip => format!("zip -qr {} {}", q(archive), q(base)),
    };
    format!("cd {} && {}", q(parent), tool)
}

/// Unpacks `archive` on the receiving host and moves the unpacked `base`
/// into place as `destination`, replacing whatever was there.
pub fn unpack_command(format: ArchiveFormat, archive: &str, base: &str, destination: &str) -> String {
    let stage = format!("{}.d", archive);
    let (dest_parent, _) = split_path(destination);
    let extract = match format {
        ArchiveFormat::Tar => format!("tar -xf {} -C {}", q(archive), q(&stage)),
        ArchiveFormat::Zip => format!("unzip -q {} -d {}", q(archive), q(&stage)),
    };
    format!(
        "rm -rf {stage} && mkdir -p {stage} && {extract} && rm -rf {dest} && mkdir -p {parent} && mv {staged} {dest}; \
         status=$?; rm -rf {stage}; exit $status",
        stage = q(&stage),
        extract = extract,
        dest = q(destination),
        parent = q(dest_parent),
        staged = q(&format!("{}/{}", stage, base)),
    )
}

/// Prepares `destination` to receive a copy named exactly `destination`.
pub fn prepare_destination_command(destination: &str, replace: bool) -> String {
    let (parent, _) = split_path(destination);
    if replace {
        format!("rm -rf {} && mkdir -p {}", q(destination), q(parent))
    } else {
        format!("mkdir -p {}", q(parent))
    }
}

/// Size in bytes of a path on a host, or nothing if `du` is unavailable.
pub fn size_command(path: &str) -> String {
    format!("du -sb {} 2>/dev/null | cut -f1", q(path))
}

pub fn remove_command(paths: &[&str]) -> String {
    let quoted: Vec<String> = paths.iter().map(|p| q(p)).collect();
    format!("rm -rf {}", quoted.join(" "))
}

fn q(s: &str) -> String {
    shell_words::quote(s).into_owned()
}
