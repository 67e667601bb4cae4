#![forbid(unsafe_code)]

//! Server configuration: the typed options that change emulator behavior,
//! the string dictionary behind `CONFIG GET`/`CONFIG SET`, and the
//! `notify-keyspace-events` flag alphabet.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Emulated server generation. Gates version-dependent behavior: `SET`
/// with `NX` and `GET` together, the `IFEQ`/`IFGT`/`IFLT` conditions, and
/// hash-field TTLs all require version 7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ServerVersion {
    V6,
    #[default]
    V7,
}

impl ServerVersion {
    #[must_use]
    pub fn as_number(self) -> u32 {
        match self {
            Self::V6 => 6,
            Self::V7 => 7,
        }
    }

    #[must_use]
    pub fn version_string(self) -> &'static str {
        match self {
            Self::V6 => "6.2.14",
            Self::V7 => "7.4.0",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub server_version: ServerVersion,
    /// Number of numbered keyspaces.
    pub databases: usize,
    /// Protocol version connections start on before `HELLO`.
    pub default_protocol: u8,
    /// Whether EVAL/EVALSHA are dispatched to the script engine at all.
    pub lua_modules: bool,
    /// Password required by AUTH / HELLO AUTH; `None` disables auth.
    pub password: Option<String>,
    pub notify_keyspace_events: NotifyFlags,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_version: ServerVersion::default(),
            databases: 16,
            default_protocol: 2,
            lua_modules: true,
            password: None,
            notify_keyspace_events: NotifyFlags::empty(),
        }
    }
}

/// Parsed `notify-keyspace-events` bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NotifyFlags(u16);

const FLAG_KEYSPACE: u16 = 1 << 0; // K
const FLAG_KEYEVENT: u16 = 1 << 1; // E
const FLAG_GENERIC: u16 = 1 << 2; // g
const FLAG_STRING: u16 = 1 << 3; // $
const FLAG_LIST: u16 = 1 << 4; // l
const FLAG_SET: u16 = 1 << 5; // s
const FLAG_HASH: u16 = 1 << 6; // h
const FLAG_ZSET: u16 = 1 << 7; // z
const FLAG_EXPIRED: u16 = 1 << 8; // x
const FLAG_EVICTED: u16 = 1 << 9; // e
const FLAG_STREAM: u16 = 1 << 10; // t
const FLAG_MODULE: u16 = 1 << 11; // d
const FLAG_KEY_MISS: u16 = 1 << 12; // m
const FLAG_NEW_KEY: u16 = 1 << 13; // n

/// `A` is an alias for "all classes" (everything except K, E, m and n).
const FLAG_ALL_CLASSES: u16 = FLAG_GENERIC
    | FLAG_STRING
    | FLAG_LIST
    | FLAG_SET
    | FLAG_HASH
    | FLAG_ZSET
    | FLAG_EXPIRED
    | FLAG_EVICTED
    | FLAG_STREAM
    | FLAG_MODULE;

const FLAG_CHARS: &[(char, u16)] = &[
    ('K', FLAG_KEYSPACE),
    ('E', FLAG_KEYEVENT),
    ('g', FLAG_GENERIC),
    ('$', FLAG_STRING),
    ('l', FLAG_LIST),
    ('s', FLAG_SET),
    ('h', FLAG_HASH),
    ('z', FLAG_ZSET),
    ('x', FLAG_EXPIRED),
    ('e', FLAG_EVICTED),
    ('t', FLAG_STREAM),
    ('d', FLAG_MODULE),
    ('m', FLAG_KEY_MISS),
    ('n', FLAG_NEW_KEY),
];

impl NotifyFlags {
    #[must_use]
    pub fn empty() -> Self {
        Self(0)
    }

    /// Parse the reference flag string, e.g. `"KEA"` or `"Elg"`.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut bits = 0_u16;
        for ch in raw.chars() {
            if ch == 'A' {
                bits |= FLAG_ALL_CLASSES;
                continue;
            }
            match FLAG_CHARS.iter().find(|(flag, _)| *flag == ch) {
                Some((_, bit)) => bits |= bit,
                None => return Err(ConfigError::BadNotifyFlags(ch)),
            }
        }
        Ok(Self(bits))
    }

    /// Render back to the canonical flag string.
    #[must_use]
    pub fn format(self) -> String {
        let mut out = String::new();
        if self.0 & FLAG_ALL_CLASSES == FLAG_ALL_CLASSES {
            for (ch, bit) in FLAG_CHARS {
                if *bit & FLAG_ALL_CLASSES == 0 && self.0 & bit != 0 {
                    out.push(*ch);
                }
            }
            out.push('A');
            return out;
        }
        for (ch, bit) in FLAG_CHARS {
            if self.0 & bit != 0 {
                out.push(*ch);
            }
        }
        out
    }

    #[must_use]
    pub fn keyspace_enabled(self) -> bool {
        self.0 & FLAG_KEYSPACE != 0
    }

    #[must_use]
    pub fn keyevent_enabled(self) -> bool {
        self.0 & FLAG_KEYEVENT != 0
    }

    /// Is the event class (the per-event `g`/`$`/`l`/... character)
    /// selected?
    #[must_use]
    pub fn class_enabled(self, class: char) -> bool {
        FLAG_CHARS
            .iter()
            .find(|(ch, _)| *ch == class)
            .is_some_and(|(_, bit)| self.0 & bit != 0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    BadNotifyFlags(char),
    UnknownParameter(String),
}

/// Defaults reported by CONFIG GET for parameters nothing in the emulator
/// interprets. Interpreted parameters are overlaid from [`Config`].
const CONFIG_STATIC_PARAMS: &[(&str, &str)] = &[
    ("bind", "127.0.0.1"),
    ("port", "6379"),
    ("databases", "16"),
    ("maxmemory", "0"),
    ("maxmemory-policy", "noeviction"),
    ("hz", "10"),
    ("timeout", "0"),
    ("tcp-keepalive", "300"),
    ("loglevel", "notice"),
    ("logfile", ""),
    ("maxclients", "10000"),
    ("save", ""),
    ("appendonly", "no"),
    ("dir", "."),
    ("dbfilename", "dump.rdb"),
    ("protected-mode", "yes"),
    ("requirepass", ""),
    ("notify-keyspace-events", ""),
    ("proto-max-bulk-len", "512000000"),
    ("list-max-listpack-size", "128"),
    ("set-max-intset-entries", "512"),
    ("set-max-listpack-entries", "128"),
    ("hash-max-listpack-entries", "128"),
    ("hash-max-listpack-value", "64"),
    ("zset-max-listpack-entries", "128"),
    ("zset-max-listpack-value", "64"),
    ("stream-node-max-bytes", "4096"),
    ("stream-node-max-entries", "100"),
    ("cluster-enabled", "no"),
];

/// The string dictionary behind CONFIG GET/SET.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigDict {
    values: BTreeMap<String, String>,
}

impl ConfigDict {
    #[must_use]
    pub fn new(config: &Config) -> Self {
        let mut values: BTreeMap<String, String> = CONFIG_STATIC_PARAMS
            .iter()
            .map(|(name, value)| ((*name).to_string(), (*value).to_string()))
            .collect();
        values.insert("databases".to_string(), config.databases.to_string());
        values.insert(
            "requirepass".to_string(),
            config.password.clone().unwrap_or_default(),
        );
        values.insert(
            "notify-keyspace-events".to_string(),
            config.notify_keyspace_events.format(),
        );
        Self { values }
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// All parameters, sorted by name, for pattern filtering by the caller.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Update a known parameter. Unknown names are rejected the way the
    /// reference server rejects them.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), ConfigError> {
        let name = name.to_ascii_lowercase();
        if !self.values.contains_key(&name) {
            return Err(ConfigError::UnknownParameter(name));
        }
        self.values.insert(name, value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_flags_roundtrip() {
        let flags = NotifyFlags::parse("KEA").expect("parse");
        assert!(flags.keyspace_enabled());
        assert!(flags.keyevent_enabled());
        assert!(flags.class_enabled('g'));
        assert!(flags.class_enabled('$'));
        assert!(flags.class_enabled('t'));
        assert!(!flags.class_enabled('m'));
        assert_eq!(flags.format(), "KEA");
    }

    #[test]
    fn notify_flags_subsets() {
        let flags = NotifyFlags::parse("Elg").expect("parse");
        assert!(!flags.keyspace_enabled());
        assert!(flags.keyevent_enabled());
        assert!(flags.class_enabled('l'));
        assert!(flags.class_enabled('g'));
        assert!(!flags.class_enabled('z'));
        assert_eq!(flags.format(), "Egl");
    }

    #[test]
    fn notify_flags_reject_unknown() {
        assert_eq!(
            NotifyFlags::parse("Kq"),
            Err(ConfigError::BadNotifyFlags('q')),
        );
    }

    #[test]
    fn empty_flags_disable_everything() {
        let flags = NotifyFlags::empty();
        assert!(!flags.keyspace_enabled());
        assert!(!flags.keyevent_enabled());
        assert!(!flags.class_enabled('g'));
        assert_eq!(flags.format(), "");
    }

    #[test]
    fn dict_seeds_from_config() {
        let config = Config {
            databases: 4,
            password: Some("hunter2".to_string()),
            notify_keyspace_events: NotifyFlags::parse("KE$").expect("parse"),
            ..Default::default()
        };
        let dict = ConfigDict::new(&config);
        assert_eq!(dict.get("databases"), Some("4"));
        assert_eq!(dict.get("requirepass"), Some("hunter2"));
        assert_eq!(dict.get("notify-keyspace-events"), Some("KE$"));
        assert_eq!(dict.get("MAXMEMORY"), Some("0"));
    }

    #[test]
    fn dict_set_rejects_unknown_parameters() {
        let mut dict = ConfigDict::new(&Config::default());
        dict.set("maxmemory", "100mb").expect("known");
        assert_eq!(dict.get("maxmemory"), Some("100mb"));
        assert_eq!(
            dict.set("no-such-option", "1"),
            Err(ConfigError::UnknownParameter("no-such-option".to_string())),
        );
    }

    #[test]
    fn config_serializes() {
        let config = Config::default();
        let json = serde_json::to_string(&config).expect("serialize");
        let back: Config = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }
}
