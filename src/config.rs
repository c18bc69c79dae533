use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub socket: SocketConfig,
    pub lists: ListConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketConfig {
    #[serde(default)]
    pub proto: Transport,
    #[serde(default = "default_socket_addr")]
    pub addr: String,
    /// Octal permission bits applied to UNIX domain sockets.
    #[serde(default = "default_socket_mode")]
    pub mode: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    #[default]
    Unix,
    Tcp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListConfig {
    /// Domain used to build the List-ID of domain-suffix matches.
    pub canonical_list_domain: String,
    pub rules: Vec<ListRule>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ListRule {
    /// Matches one destination address exactly.
    Exact {
        address: String,
        unsubscribe_url: String,
    },
    /// Matches any local part under a domain.
    Domain {
        domain_suffix: String,
        unsubscribe_url: String,
        // Overrides ListConfig::canonical_list_domain for this rule
        #[serde(default, skip_serializing_if = "Option::is_none")]
        canonical_list_domain: Option<String>,
    },
}

const DEFAULT_UNSUBSCRIBE_URL: &str = "https://giraffic.world/lists";

const DEFAULT_LIST_ADDRESSES: &[&str] = &[
    "utilities@giraffic.world",
    "houseboats-21@giraffic.world",
    "houseboats-22@giraffic.world",
    "22-leads@giraffic.world",
    "membership@giraffic.world",
    "2018@giraffic.world",
    "2021@giraffic.world",
    "test-email-list@giraffic.world",
];

const DEFAULT_LIST_DOMAINS: &[&str] = &["lists.giraffes.camp", "lists.giraffic.world"];

fn default_socket_addr() -> String {
    "/var/run/listid-milter.sock".to_string()
}

fn default_socket_mode() -> String {
    "0660".to_string()
}

impl Default for SocketConfig {
    fn default() -> Self {
        SocketConfig {
            proto: Transport::Unix,
            addr: default_socket_addr(),
            mode: default_socket_mode(),
        }
    }
}

impl Default for ListConfig {
    fn default() -> Self {
        let exact = DEFAULT_LIST_ADDRESSES.iter().map(|address| ListRule::Exact {
            address: address.to_string(),
            unsubscribe_url: DEFAULT_UNSUBSCRIBE_URL.to_string(),
        });
        let domains = DEFAULT_LIST_DOMAINS.iter().map(|domain| ListRule::Domain {
            domain_suffix: domain.to_string(),
            unsubscribe_url: DEFAULT_UNSUBSCRIBE_URL.to_string(),
            canonical_list_domain: None,
        });

        ListConfig {
            canonical_list_domain: "lists.giraffic.world".to_string(),
            rules: exact.chain(domains).collect(),
        }
    }
}

impl Transport {
    pub fn as_str(&self) -> &'static str {
        match self {
            Transport::Unix => "unix",
            Transport::Tcp => "tcp",
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Transport {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s {
            "unix" => Ok(Transport::Unix),
            "tcp" => Ok(Transport::Tcp),
            other => bail!("invalid protocol name: {other} (expected unix or tcp)"),
        }
    }
}

impl SocketConfig {
    pub fn mode_bits(&self) -> anyhow::Result<u32> {
        let digits = self.mode.trim_start_matches("0o");
        let bits = u32::from_str_radix(digits, 8)
            .with_context(|| format!("socket mode '{}' is not an octal number", self.mode))?;
        if bits > 0o7777 {
            bail!("socket mode '{}' is out of range", self.mode);
        }
        Ok(bits)
    }
}

impl ListRule {
    pub fn unsubscribe_url(&self) -> &str {
        match self {
            ListRule::Exact {
                unsubscribe_url, ..
            }
            | ListRule::Domain {
                unsubscribe_url, ..
            } => unsubscribe_url,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ListRule::Exact { address, .. } => format!("address {address}"),
            ListRule::Domain {
                domain_suffix,
                canonical_list_domain: Some(canonical),
                ..
            } => format!("domain {domain_suffix} (list domain {canonical})"),
            ListRule::Domain { domain_suffix, .. } => format!("domain {domain_suffix}"),
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_yaml_str(&content).with_context(|| format!("Invalid config file: {path}"))
    }

    pub fn from_yaml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_yaml::from_str(content)?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.socket.mode_bits()?;
        if self.socket.addr.trim().is_empty() {
            bail!("socket address must not be empty");
        }
        self.lists.validate()
    }
}

impl ListConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        check_domain(&self.canonical_list_domain, "canonical_list_domain")?;

        let mut addresses = HashSet::new();
        let mut suffixes = HashSet::new();

        for (i, rule) in self.rules.iter().enumerate() {
            let position = i + 1;
            match rule {
                ListRule::Exact { address, .. } => {
                    match address.split_once('@') {
                        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => {}
                        _ => bail!("rule {position}: '{address}' is not a mailbox address"),
                    }
                    if !addresses.insert(address.as_str()) {
                        bail!("rule {position}: duplicate list address {address}");
                    }
                }
                ListRule::Domain {
                    domain_suffix,
                    canonical_list_domain,
                    ..
                } => {
                    check_domain(domain_suffix, &format!("rule {position} domain_suffix"))?;
                    if let Some(canonical) = canonical_list_domain {
                        check_domain(
                            canonical,
                            &format!("rule {position} canonical_list_domain"),
                        )?;
                    }
                    if !suffixes.insert(domain_suffix.as_str()) {
                        bail!("rule {position}: duplicate list domain {domain_suffix}");
                    }
                }
            }

            url::Url::parse(rule.unsubscribe_url()).with_context(|| {
                format!(
                    "rule {position}: invalid unsubscribe_url '{}'",
                    rule.unsubscribe_url()
                )
            })?;
        }

        Ok(())
    }
}

fn check_domain(domain: &str, field: &str) -> anyhow::Result<()> {
    if domain.is_empty() || domain.contains('@') || domain.chars().any(char::is_whitespace) {
        bail!("{field}: '{domain}' is not a domain name");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.lists.rules.len(), 10);
        assert_eq!(config.socket.proto, Transport::Unix);
        assert_eq!(config.socket.mode_bits().unwrap(), 0o660);
    }

    #[test]
    fn test_parse_yaml_config() {
        let yaml = r#"
socket:
  proto: tcp
  addr: 127.0.0.1:8890
lists:
  canonical_list_domain: lists.example.org
  rules:
    - type: Exact
      address: news@example.org
      unsubscribe_url: https://example.org/unsubscribe
    - type: Domain
      domain_suffix: groups.example.net
      unsubscribe_url: mailto:leave@example.net
      canonical_list_domain: groups.example.org
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.socket.proto, Transport::Tcp);
        assert_eq!(config.socket.addr, "127.0.0.1:8890");
        assert_eq!(config.socket.mode, "0660");
        assert_eq!(
            config.lists.rules[1],
            ListRule::Domain {
                domain_suffix: "groups.example.net".to_string(),
                unsubscribe_url: "mailto:leave@example.net".to_string(),
                canonical_list_domain: Some("groups.example.org".to_string()),
            }
        );
    }

    #[test]
    fn test_socket_section_is_optional() {
        let yaml = r#"
lists:
  canonical_list_domain: lists.example.org
  rules: []
"#;
        let config = Config::from_yaml_str(yaml).unwrap();
        assert_eq!(config.socket.addr, "/var/run/listid-milter.sock");
        config.validate().unwrap();
    }

    #[test]
    fn test_invalid_protocol_name() {
        assert_eq!("unix".parse::<Transport>().unwrap(), Transport::Unix);
        assert_eq!("tcp".parse::<Transport>().unwrap(), Transport::Tcp);
        assert!("udp".parse::<Transport>().is_err());
        assert!("UNIX".parse::<Transport>().is_err());
        assert!("".parse::<Transport>().is_err());
    }

    #[test]
    fn test_rejects_bad_rules() {
        let mut lists = ListConfig::default();
        lists.rules.push(ListRule::Exact {
            address: "no-at-sign".to_string(),
            unsubscribe_url: DEFAULT_UNSUBSCRIBE_URL.to_string(),
        });
        assert!(lists.validate().is_err());

        let mut lists = ListConfig::default();
        lists.rules.push(ListRule::Exact {
            address: "utilities@giraffic.world".to_string(),
            unsubscribe_url: DEFAULT_UNSUBSCRIBE_URL.to_string(),
        });
        assert!(lists.validate().is_err(), "duplicate address accepted");

        let mut lists = ListConfig::default();
        lists.rules.push(ListRule::Domain {
            domain_suffix: String::new(),
            unsubscribe_url: DEFAULT_UNSUBSCRIBE_URL.to_string(),
            canonical_list_domain: None,
        });
        assert!(lists.validate().is_err());

        let mut lists = ListConfig::default();
        lists.rules.push(ListRule::Exact {
            address: "news@example.org".to_string(),
            unsubscribe_url: "not a url".to_string(),
        });
        assert!(lists.validate().is_err());

        let lists = ListConfig {
            canonical_list_domain: String::new(),
            rules: Vec::new(),
        };
        assert!(lists.validate().is_err());
    }

    #[test]
    fn test_socket_mode_parsing() {
        let mut socket = SocketConfig::default();
        socket.mode = "0o600".to_string();
        assert_eq!(socket.mode_bits().unwrap(), 0o600);
        socket.mode = "0999".to_string();
        assert!(socket.mode_bits().is_err());
        socket.mode = "77777".to_string();
        assert!(socket.mode_bits().is_err());
    }

    #[test]
    fn test_config_file_round_trip() {
        let path = std::env::temp_dir().join(format!("listid-milter-{}.yaml", std::process::id()));
        let path = path.to_str().unwrap();

        Config::default().to_file(path).unwrap();
        let loaded = Config::from_file(path).unwrap();
        std::fs::remove_file(path).unwrap();

        assert_eq!(loaded.lists.rules, ListConfig::default().rules);
        assert_eq!(loaded.socket.addr, SocketConfig::default().addr);
    }
}
