use std::fmt;
use std::str::FromStr;

/// Collections the console manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Users,
    Events,
    Programmes,
    Jobs,
    Facilities,
    Registrations,
    Documents,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        Self::Users,
        Self::Events,
        Self::Programmes,
        Self::Jobs,
        Self::Facilities,
        Self::Registrations,
        Self::Documents,
    ];

    /// Collection endpoint, relative to the API base address.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::Users => "/api/users",
            Self::Events => "/api/events",
            Self::Programmes => "/api/programmes",
            Self::Jobs => "/api/jobs",
            Self::Facilities => "/api/facilities",
            Self::Registrations => "/api/registrations",
            Self::Documents => "/api/documents",
        }
    }

    /// Endpoint of one record.
    pub fn record_path(self, id: &str) -> String {
        format!("{}/{}", self.endpoint(), id.trim_matches('/'))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Users => "users",
            Self::Events => "events",
            Self::Programmes => "programmes",
            Self::Jobs => "jobs",
            Self::Facilities => "facilities",
            Self::Registrations => "registrations",
            Self::Documents => "documents",
        }
    }

    /// Singular label for notices ("User created").
    pub fn singular(self) -> &'static str {
        match self {
            Self::Users => "User",
            Self::Events => "Event",
            Self::Programmes => "Programme",
            Self::Jobs => "Job",
            Self::Facilities => "Facility",
            Self::Registrations => "Registration",
            Self::Documents => "Document",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == wanted || kind.singular().eq_ignore_ascii_case(&wanted))
            .ok_or_else(|| {
                let known: Vec<&str> = Self::ALL.iter().map(|k| k.as_str()).collect();
                format!("unknown resource '{s}' (expected one of: {})", known.join(", "))
            })
    }
}
