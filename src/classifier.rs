use crate::config::{ListConfig, ListRule};

/// Outcome of looking a destination address up in the list rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Classification {
    #[default]
    NoMatch,
    Matched {
        list_id: String,
        unsubscribe_url: String,
    },
}

impl Classification {
    pub fn is_match(&self) -> bool {
        matches!(self, Classification::Matched { .. })
    }

    /// Header fields to add for this message, List-Unsubscribe first.
    pub fn list_headers(&self) -> Vec<(String, String)> {
        match self {
            Classification::NoMatch => Vec::new(),
            Classification::Matched {
                list_id,
                unsubscribe_url,
            } => vec![
                ("List-Unsubscribe".to_string(), format!("<{unsubscribe_url}>")),
                ("List-ID".to_string(), format!("<{list_id}>")),
            ],
        }
    }
}

#[derive(Debug, Clone)]
struct ExactRule {
    address: String,
    unsubscribe_url: String,
}

#[derive(Debug, Clone)]
struct DomainRule {
    domain: String,
    list_domain: String,
    unsubscribe_url: String,
}

/// Decides whether a destination address belongs to a mailing list.
///
/// Built once from the loaded configuration and shared read-only between
/// connections. Exact address rules are checked before domain rules;
/// comparisons are case-sensitive.
#[derive(Debug, Clone)]
pub struct Classifier {
    exact: Vec<ExactRule>,
    domains: Vec<DomainRule>,
}

impl Classifier {
    pub fn new(config: &ListConfig) -> Self {
        let mut exact = Vec::new();
        let mut domains = Vec::new();

        for rule in &config.rules {
            match rule {
                ListRule::Exact {
                    address,
                    unsubscribe_url,
                } => exact.push(ExactRule {
                    address: address.clone(),
                    unsubscribe_url: unsubscribe_url.clone(),
                }),
                ListRule::Domain {
                    domain_suffix,
                    unsubscribe_url,
                    canonical_list_domain,
                } => domains.push(DomainRule {
                    domain: domain_suffix.clone(),
                    list_domain: canonical_list_domain
                        .clone()
                        .unwrap_or_else(|| config.canonical_list_domain.clone()),
                    unsubscribe_url: unsubscribe_url.clone(),
                }),
            }
        }

        log::debug!(
            "Classifier loaded {} address rules and {} domain rules",
            exact.len(),
            domains.len()
        );

        Classifier { exact, domains }
    }

    pub fn rule_count(&self) -> usize {
        self.exact.len() + self.domains.len()
    }

    pub fn classify(&self, address: &str) -> Classification {
        if let Some(rule) = self.exact.iter().find(|rule| rule.address == address) {
            return Classification::Matched {
                list_id: address.to_string(),
                unsubscribe_url: rule.unsubscribe_url.clone(),
            };
        }

        // Only the first '@' separates local part from domain
        let Some((local_part, domain)) = address.split_once('@') else {
            return Classification::NoMatch;
        };

        match self.domains.iter().find(|rule| rule.domain == domain) {
            Some(rule) => Classification::Matched {
                list_id: format!("{}@{}", local_part, rule.list_domain),
                unsubscribe_url: rule.unsubscribe_url.clone(),
            },
            None => Classification::NoMatch,
        }
    }
}
