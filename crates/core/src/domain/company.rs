use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompanyId(pub String);

impl std::fmt::Display for CompanyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    /// Offer number prefix such as `ST` in `ST-2025-001`.
    pub number_prefix: Option<String>,
    pub default_responsible_user: Option<String>,
}

impl Company {
    pub fn prefix_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.number_prefix
            .as_deref()
            .map(str::trim)
            .filter(|prefix| !prefix.is_empty())
            .unwrap_or(fallback)
    }

    pub fn default_responsible(&self) -> Option<&str> {
        self.default_responsible_user.as_deref().map(str::trim).filter(|user| !user.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::{Company, CompanyId};

    fn company(prefix: Option<&str>) -> Company {
        Company {
            id: CompanyId("stalbygg".to_string()),
            name: "Stålbygg".to_string(),
            number_prefix: prefix.map(str::to_string),
            default_responsible_user: Some("  ".to_string()),
        }
    }

    #[test]
    fn prefix_falls_back_when_missing_or_blank() {
        assert_eq!(company(Some("ST")).prefix_or("GR"), "ST");
        assert_eq!(company(Some(" ")).prefix_or("GR"), "GR");
        assert_eq!(company(None).prefix_or("GR"), "GR");
    }

    #[test]
    fn blank_default_responsible_is_ignored() {
        assert_eq!(company(None).default_responsible(), None);
    }
}
