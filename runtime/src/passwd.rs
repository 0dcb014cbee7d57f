use std::path::Path;

/// Minimal reader for an app rootfs's `etc/passwd` and `etc/group`,
/// used to map declared user/group specs to numeric ids before entering
/// the jail. A missing file reads as empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PasswdEntry {
    pub name: String,
    pub uid: u32,
    pub gid: u32,
}

#[derive(Debug, Default)]
pub(crate) struct PasswdFile(Vec<PasswdEntry>);

impl PasswdFile {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 4 {
                continue;
            }
            let (Ok(uid), Ok(gid)) = (fields[2].parse(), fields[3].parse()) else {
                continue;
            };
            entries.push(PasswdEntry {
                name: fields[0].to_string(),
                uid,
                gid,
            });
        }
        PasswdFile(entries)
    }

    /// Finds a user by name or by numeric uid spec.
    pub fn find(&self, spec: &str) -> Option<&PasswdEntry> {
        if let Some(entry) = self.0.iter().find(|e| e.name == spec) {
            return Some(entry);
        }
        let uid: u32 = spec.parse().ok()?;
        self.0.iter().find(|e| e.uid == uid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct GroupEntry {
    pub name: String,
    pub gid: u32,
}

#[derive(Debug, Default)]
pub(crate) struct GroupFile(Vec<GroupEntry>);

impl GroupFile {
    pub fn load(path: &Path) -> std::io::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Self::parse(&content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    pub fn parse(content: &str) -> Self {
        let mut entries = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 3 {
                continue;
            }
            let Ok(gid) = fields[2].parse() else {
                continue;
            };
            entries.push(GroupEntry {
                name: fields[0].to_string(),
                gid,
            });
        }
        GroupFile(entries)
    }

    /// Resolves a group spec to a gid: by name, else as a literal
    /// number.
    pub fn find_gid(&self, spec: &str) -> Option<u32> {
        if let Some(entry) = self.0.iter().find(|e| e.name == spec) {
            return Some(entry.gid);
        }
        spec.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "\
# $FreeBSD$
root:*:0:0:Charlie &:/root:/bin/csh
daemon:*:1:1:Owner of many system processes:/root:/usr/sbin/nologin
worker:*:1001:1001:Worker:/home/worker:/bin/sh
broken line without colons
";

    const GROUP: &str = "\
wheel:*:0:root
daemon:*:1:
worker:*:1001:
";

    #[test]
    fn test_passwd_lookup() {
        let pw = PasswdFile::parse(PASSWD);
        assert_eq!(
            pw.find("worker"),
            Some(&PasswdEntry {
                name: "worker".into(),
                uid: 1001,
                gid: 1001
            })
        );
        assert_eq!(pw.find("0").unwrap().name, "root");
        assert_eq!(pw.find("1001").unwrap().name, "worker");
        assert!(pw.find("nobody").is_none());
    }

    #[test]
    fn test_group_lookup() {
        let gr = GroupFile::parse(GROUP);
        assert_eq!(gr.find_gid("wheel"), Some(0));
        assert_eq!(gr.find_gid("worker"), Some(1001));
        // Numeric fallback for groups not present in the file.
        assert_eq!(gr.find_gid("4242"), Some(4242));
        assert_eq!(gr.find_gid("nope"), None);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let pw = PasswdFile::load(Path::new("/definitely/not/passwd")).unwrap();
        assert!(pw.find("root").is_none());
        let gr = GroupFile::load(Path::new("/definitely/not/group")).unwrap();
        assert_eq!(gr.find_gid("wheel"), None);
    }
}
