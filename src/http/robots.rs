use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use url::Url;

use super::client::Fetcher;

/// Parsed robots.txt rules applying to us (`*` and any agent containing "bot").
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RobotsRules {
    allow: Vec<String>,
    disallow: Vec<String>,
    crawl_delay: Option<Duration>,
}

impl RobotsRules {
    /// Parse a robots.txt body. Unknown directives are ignored.
    pub fn parse(body: &str) -> Self {
        let mut rules = RobotsRules::default();
        // Agent lines seen for the current group, and whether rules have
        // started (a new User-agent after rules opens a new group)
        let mut group_applies = false;
        let mut in_rules = false;

        for raw_line in body.lines() {
            let line = raw_line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if in_rules {
                        group_applies = false;
                        in_rules = false;
                    }
                    let agent = value.to_ascii_lowercase();
                    if agent == "*" || agent.contains("bot") {
                        group_applies = true;
                    }
                }
                "allow" | "disallow" | "crawl-delay" => {
                    in_rules = true;
                    if !group_applies {
                        continue;
                    }
                    match key.as_str() {
                        "allow" if !value.is_empty() => rules.allow.push(value.to_owned()),
                        "disallow" if !value.is_empty() => rules.disallow.push(value.to_owned()),
                        "crawl-delay" => {
                            if let Ok(secs) = value.parse::<f64>() {
                                if secs.is_finite() && secs >= 0.0 {
                                    let delay = Duration::from_secs_f64(secs);
                                    rules.crawl_delay =
                                        Some(rules.crawl_delay.map_or(delay, |d| d.max(delay)));
                                }
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        rules
    }

    /// Longest matching rule wins; Allow wins ties. No match means allowed.
    pub fn is_allowed(&self, path: &str) -> bool {
        let longest = |patterns: &[String]| {
            patterns
                .iter()
                .filter(|p| pattern_matches(p, path))
                .map(|p| p.len())
                .max()
        };

        match (longest(&self.allow), longest(&self.disallow)) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }

    pub fn crawl_delay(&self) -> Option<Duration> {
        self.crawl_delay
    }
}

/// robots.txt path match: prefix semantics, `*` matches any run, trailing `$`
/// anchors the end.
fn pattern_matches(pattern: &str, path: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };

    let mut parts = pattern.split('*');
    let first = parts.next().unwrap_or("");
    let Some(mut rest) = path.strip_prefix(first) else {
        return false;
    };

    let remaining: Vec<&str> = parts.collect();
    if remaining.is_empty() {
        return !anchored || rest.is_empty();
    }

    for (i, part) in remaining.iter().enumerate() {
        let is_last = i == remaining.len() - 1;
        if is_last && anchored {
            return rest.ends_with(part);
        }
        match rest.find(part) {
            Some(pos) => rest = &rest[pos + part.len()..],
            None => return false,
        }
    }
    true
}

/// Per-host robots.txt cache. Fail-open: any fetch or parse problem allows.
pub struct RobotsPolicy {
    fetcher: Fetcher,
    hosts: RwLock<HashMap<String, Arc<RobotsRules>>>,
}

impl RobotsPolicy {
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            fetcher,
            hosts: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        match self.rules_for(&parsed).await {
            Some(rules) => rules.is_allowed(path_and_query(&parsed).as_str()),
            None => true,
        }
    }

    pub async fn crawl_delay(&self, url: &str) -> Option<Duration> {
        let parsed = Url::parse(url).ok()?;
        self.rules_for(&parsed).await?.crawl_delay()
    }

    async fn rules_for(&self, url: &Url) -> Option<Arc<RobotsRules>> {
        let host = url.host_str()?;
        let origin = match url.port() {
            Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
            None => format!("{}://{}", url.scheme(), host),
        };

        {
            let hosts = self.hosts.read().unwrap_or_else(|e| e.into_inner());
            if let Some(rules) = hosts.get(&origin) {
                return Some(Arc::clone(rules));
            }
        }

        let robots_url = format!("{origin}/robots.txt");
        let rules = match self.fetcher.get(&robots_url).await {
            Ok(resp) if resp.is_ok() => RobotsRules::parse(&resp.text()),
            // No robots.txt (or an error page): everything allowed
            Ok(_) => RobotsRules::default(),
            Err(e) => {
                tracing::debug!(url = %robots_url, error = %e, "robots.txt fetch failed, allowing");
                return None;
            }
        };

        let rules = Arc::new(rules);
        self.hosts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(origin, Arc::clone(&rules));
        Some(rules)
    }
}

fn path_and_query(url: &Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::FetcherConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const ROBOTS: &str = "\
User-agent: Googlebot
Disallow: /google-only

User-agent: SpecificCrawler
Disallow: /

User-agent: *
Disallow: /private
Allow: /private/public
Disallow: /*.pdf$
Crawl-delay: 2
";

    #[test]
    fn test_parse_applicable_groups() {
        let rules = RobotsRules::parse(ROBOTS);
        // Googlebot contains "bot" and applies; SpecificCrawler does not
        assert!(!rules.is_allowed("/google-only/page"));
        assert!(rules.is_allowed("/"));
        assert!(rules.is_allowed("/articles/1"));
        assert_eq!(rules.crawl_delay(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_longest_match_wins() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!rules.is_allowed("/private/secret"));
        assert!(rules.is_allowed("/private/public/page"));
    }

    #[test]
    fn test_wildcard_and_anchor() {
        let rules = RobotsRules::parse(ROBOTS);
        assert!(!rules.is_allowed("/files/report.pdf"));
        assert!(rules.is_allowed("/files/report.pdf.html"));
    }

    #[test]
    fn test_empty_disallow_allows_everything() {
        let rules = RobotsRules::parse("User-agent: *\nDisallow:\n");
        assert!(rules.is_allowed("/anything"));
    }

    #[tokio::test]
    async fn test_policy_fetches_once_per_host() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ROBOTS))
            .expect(1)
            .mount(&server)
            .await;

        let policy = RobotsPolicy::new(Fetcher::new(FetcherConfig::unthrottled()).unwrap());
        assert!(!policy.is_allowed(&format!("{}/private/x", server.uri())).await);
        assert!(policy.is_allowed(&format!("{}/blog/x", server.uri())).await);
        assert_eq!(
            policy.crawl_delay(&server.uri()).await,
            Some(Duration::from_secs(2))
        );
    }

    #[tokio::test]
    async fn test_policy_missing_robots_allows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let policy = RobotsPolicy::new(Fetcher::new(FetcherConfig::unthrottled()).unwrap());
        assert!(policy.is_allowed(&format!("{}/private/x", server.uri())).await);
    }

    #[tokio::test]
    async fn test_policy_fails_open_on_network_error() {
        let policy = RobotsPolicy::new(Fetcher::new(FetcherConfig::unthrottled()).unwrap());
        // Port 9 (discard) on localhost is not listening in test environments
        assert!(policy.is_allowed("http://127.0.0.1:9/private").await);
    }
}
