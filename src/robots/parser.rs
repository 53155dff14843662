//! Robots.txt parser implementation
//!
//! Allow/disallow matching is delegated to the `robotstxt` crate; the group
//! scan below only extracts the values that crate does not expose
//! (crawl-delay and the raw disallow patterns).

use robotstxt::DefaultMatcher;

/// Parsed robots.txt data
#[derive(Debug, Clone)]
pub struct ParsedRobots {
    /// Raw robots.txt content (empty string means allow all)
    content: String,
    /// Whether to allow all (true = allow all, false = parse content)
    allow_all: bool,
    groups: Vec<Group>,
}

/// One `User-agent` group
#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<f64>,
}

impl Group {
    fn is_wildcard(&self) -> bool {
        self.agents.iter().any(|ua| ua == "*")
    }

    fn names(&self, agent: &str) -> bool {
        self.agents
            .iter()
            .any(|ua| ua != "*" && !ua.is_empty() && agent.contains(ua.as_str()))
    }
}

impl ParsedRobots {
    /// Creates a new ParsedRobots from raw robots.txt content
    pub fn from_content(content: &str) -> Self {
        Self {
            content: content.to_string(),
            allow_all: false,
            groups: parse_groups(content),
        }
    }

    /// Creates a permissive ParsedRobots that allows everything
    ///
    /// Used when the host has no robots.txt, and as the fallback when it
    /// cannot be fetched.
    pub fn allow_all() -> Self {
        Self {
            content: String::new(),
            allow_all: true,
            groups: Vec::new(),
        }
    }

    /// Returns the raw robots.txt content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Checks if a URL is allowed for the given user agent
    ///
    /// # Arguments
    ///
    /// * `url` - The URL (or bare path) to check
    /// * `user_agent` - The crawler's product token
    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        if self.allow_all || self.content.is_empty() {
            return true;
        }

        let mut matcher = DefaultMatcher::default();
        matcher.one_agent_allowed_by_robots(&self.content, user_agent, url)
    }

    /// Gets the crawl delay (seconds) for a user agent
    ///
    /// A group naming the agent wins over the `*` group.
    pub fn crawl_delay(&self, user_agent: &str) -> Option<f64> {
        let agent = user_agent.to_lowercase();

        self.groups
            .iter()
            .filter(|g| g.names(&agent))
            .find_map(|g| g.crawl_delay)
            .or_else(|| {
                self.groups
                    .iter()
                    .filter(|g| g.is_wildcard())
                    .find_map(|g| g.crawl_delay)
            })
    }

    /// Gets the disallow patterns that apply to a user agent
    ///
    /// Like the matcher, uses the agent's own groups when any exist and the
    /// `*` groups otherwise.
    pub fn disallow_patterns(&self, user_agent: &str) -> Vec<String> {
        let agent = user_agent.to_lowercase();

        let specific: Vec<&Group> = self.groups.iter().filter(|g| g.names(&agent)).collect();
        let chosen: Vec<&Group> = if specific.is_empty() {
            self.groups.iter().filter(|g| g.is_wildcard()).collect()
        } else {
            specific
        };

        chosen
            .into_iter()
            .flat_map(|g| g.disallow.iter().cloned())
            .collect()
    }
}

/// Splits robots.txt content into user-agent groups
///
/// Consecutive `User-agent` lines share a group; any other directive closes
/// the run so the next `User-agent` starts a new group.
fn parse_groups(content: &str) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut current: Option<Group> = None;
    let mut in_agent_run = false;

    for line in content.lines() {
        // Strip trailing comments
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if !in_agent_run {
                    if let Some(group) = current.take() {
                        groups.push(group);
                    }
                    current = Some(Group::default());
                }
                if let Some(group) = current.as_mut() {
                    group.agents.push(value.to_lowercase());
                }
                in_agent_run = true;
            }
            "disallow" => {
                in_agent_run = false;
                if let Some(group) = current.as_mut() {
                    if !value.is_empty() {
                        group.disallow.push(value.to_string());
                    }
                }
            }
            "crawl-delay" => {
                in_agent_run = false;
                if let Some(group) = current.as_mut() {
                    if let Ok(delay) = value.parse::<f64>() {
                        if delay.is_finite() && delay >= 0.0 {
                            group.crawl_delay = Some(delay);
                        }
                    }
                }
            }
            _ => {
                in_agent_run = false;
            }
        }
    }

    if let Some(group) = current {
        groups.push(group);
    }

    groups
}
