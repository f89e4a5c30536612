use std::fmt;

/// The parts of a claim admission request that authorization depends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClaimRequest {
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub operation: String,
    pub storage_class: String,
}

impl fmt::Display for ClaimRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {:?} in namespace {:?}",
            self.operation, self.kind, self.name, self.namespace
        )
    }
}
