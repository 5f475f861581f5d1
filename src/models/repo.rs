use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Canonical repository candidate. Every accessor operation normalizes into
/// this shape immediately after fetch, so downstream filters never branch on
/// where a candidate came from.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub owner: RepoOwner,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RepoOwner {
    pub login: String,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl Repository {
    /// Identity used for deduplication across resolution paths.
    pub fn identity(&self) -> String {
        self.full_name.to_lowercase()
    }

    pub fn is_organization_owned(&self) -> bool {
        self.owner.kind.as_deref() == Some("Organization")
    }

    /// Builds a repository from either a plain repository object or a search
    /// item carrying the repository under a nested `repository` field (code
    /// and commit search results). Items with no usable repository object
    /// are dropped.
    pub fn from_search_item(item: &Value) -> Option<Repository> {
        let object = item.get("repository").unwrap_or(item);
        match serde_json::from_value(object.clone()) {
            Ok(repo) => Some(repo),
            Err(e) => {
                debug!("dropping search item without a usable repository object: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_direct_repository_object() {
        let item = json!({
            "name": "api",
            "full_name": "Acme/api",
            "html_url": "https://github.com/acme/api",
            "owner": {"login": "acme", "type": "Organization"}
        });
        let repo = Repository::from_search_item(&item).unwrap();
        assert_eq!(repo.identity(), "acme/api");
        assert!(repo.is_organization_owned());
    }

    #[test]
    fn parses_nested_repository_from_search_result() {
        let item = json!({
            "path": "config/settings.py",
            "repository": {
                "name": "web",
                "full_name": "bob/web",
                "html_url": "https://github.com/bob/web",
                "owner": {"login": "bob", "type": "User"}
            }
        });
        let repo = Repository::from_search_item(&item).unwrap();
        assert_eq!(repo.full_name, "bob/web");
        assert!(!repo.is_organization_owned());
    }

    #[test]
    fn missing_owner_type_is_not_organization() {
        let item = json!({
            "name": "tool",
            "full_name": "carol/tool",
            "html_url": "https://github.com/carol/tool",
            "owner": {"login": "carol"}
        });
        let repo = Repository::from_search_item(&item).unwrap();
        assert!(!repo.is_organization_owned());
    }

    #[test]
    fn unusable_item_is_dropped() {
        let item = json!({"title": "issue with no repository object"});
        assert!(Repository::from_search_item(&item).is_none());
    }
}
