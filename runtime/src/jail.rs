use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Live state of one jail as reported by the kernel: its id and whether
/// it is tearing down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JailStatus {
    pub jid: i32,
    pub dying: bool,
}

/// Parses `jls -d jid dying name` output. Names may contain spaces, so
/// only the first two fields are split off.
pub(crate) fn parse_jls(lines: &[String]) -> Result<HashMap<String, JailStatus>> {
    let mut statuses = HashMap::new();
    for line in lines {
        let mut fields = line.splitn(3, ' ');
        let (Some(jid), Some(dying), Some(name)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(Error::InconsistentState(format!(
                "cannot parse jls line {:?}",
                line
            )));
        };
        let jid: i32 = jid
            .parse()
            .map_err(|_| Error::InconsistentState(format!("cannot parse jls line {:?}", line)))?;
        let dying: i32 = dying
            .parse()
            .map_err(|_| Error::InconsistentState(format!("cannot parse jls line {:?}", line)))?;
        statuses.insert(
            name.to_string(),
            JailStatus {
                jid,
                dying: dying != 0,
            },
        );
    }
    Ok(statuses)
}

/// Process-local cache over the jail status listing. Advisory only: a
/// stale entry must never authorize a destructive action, so callers
/// re-fetch with `refresh` before acting.
pub(crate) struct StatusCache {
    entries: HashMap<String, JailStatus>,
    fetched_at: Option<Instant>,
    ttl: Duration,
}

impl StatusCache {
    pub fn new(ttl: Duration) -> Self {
        StatusCache {
            entries: HashMap::new(),
            fetched_at: None,
            ttl,
        }
    }

    pub fn is_fresh(&self) -> bool {
        self.fetched_at
            .is_some_and(|at| at.elapsed() <= self.ttl)
    }

    pub fn store(&mut self, entries: HashMap<String, JailStatus>) {
        self.entries = entries;
        self.fetched_at = Some(Instant::now());
    }

    pub fn get(&self, name: &str) -> Option<JailStatus> {
        self.entries.get(name).copied()
    }
}

/// Renders one jail.conf stanza with sorted, quoted parameters.
pub(crate) fn render_jail_conf(jail_name: &str, parameters: &BTreeMap<String, String>) -> String {
    let mut out = format!("{} {{\n", quote(jail_name));
    for (key, value) in parameters {
        out.push_str(&format!("  {}={};\n", key, quote(value)));
    }
    out.push_str("}\n");
    out
}

fn quote(s: &str) -> String {
    let mut quoted = String::with_capacity(s.len() + 2);
    quoted.push('"');
    for c in s.chars() {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_jls() {
        let lines = vec![
            "3 0 brig-4a5b".to_string(),
            "7 1 brig-9c0d".to_string(),
        ];
        let statuses = parse_jls(&lines).unwrap();
        assert_eq!(
            statuses["brig-4a5b"],
            JailStatus {
                jid: 3,
                dying: false
            }
        );
        assert_eq!(statuses["brig-9c0d"], JailStatus { jid: 7, dying: true });
    }

    #[test]
    fn test_parse_jls_rejects_garbage() {
        assert!(parse_jls(&["nope".to_string()]).is_err());
        assert!(parse_jls(&["x 0 name".to_string()]).is_err());
    }

    #[test]
    fn test_cache_freshness() {
        let mut cache = StatusCache::new(Duration::from_secs(60));
        assert!(!cache.is_fresh());
        cache.store(HashMap::from([(
            "brig-x".to_string(),
            JailStatus { jid: 1, dying: false },
        )]));
        assert!(cache.is_fresh());
        assert_eq!(cache.get("brig-x").unwrap().jid, 1);
        assert!(cache.get("brig-y").is_none());

        let mut expired = StatusCache::new(Duration::ZERO);
        expired.store(HashMap::new());
        assert!(!expired.is_fresh());
    }

    #[test]
    fn test_render_jail_conf() {
        let mut params = BTreeMap::new();
        params.insert("persist".to_string(), "true".to_string());
        params.insert("host.hostname".to_string(), "worker.example".to_string());
        params.insert("path".to_string(), "/brig/pods/x/rootfs".to_string());

        let conf = render_jail_conf("brig-x", &params);
        assert_eq!(
            conf,
            "\"brig-x\" {\n  host.hostname=\"worker.example\";\n  path=\"/brig/pods/x/rootfs\";\n  persist=\"true\";\n}\n"
        );
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote(r#"a"b\c"#), r#""a\"b\\c""#);
    }
}
