use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Course,
    CourseInstance,
}

impl ResourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ResourceKind::Course => "courses",
            ResourceKind::CourseInstance => "instances",
        }
    }
}

/// Identifies one cached result set: a resource kind plus query parameters.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub resource: ResourceKind,
    pub params: Vec<String>,
}

impl QueryKey {
    pub fn new<I, S>(resource: ResourceKind, params: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            resource,
            params: params.into_iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.resource == prefix.resource && self.params.starts_with(&prefix.params)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.resource.as_str())?;
        for param in &self.params {
            write!(f, "/{}", param)?;
        }
        Ok(())
    }
}

/// Selects the cache entries a mutation invalidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyFilter {
    Exact(QueryKey),
    Prefix(QueryKey),
    Resource(ResourceKind),
}

impl KeyFilter {
    pub fn matches(&self, key: &QueryKey) -> bool {
        match self {
            KeyFilter::Exact(exact) => key == exact,
            KeyFilter::Prefix(prefix) => key.starts_with(prefix),
            KeyFilter::Resource(kind) => key.resource == *kind,
        }
    }
}

impl From<QueryKey> for KeyFilter {
    fn from(key: QueryKey) -> Self {
        KeyFilter::Exact(key)
    }
}

impl From<ResourceKind> for KeyFilter {
    fn from(kind: ResourceKind) -> Self {
        KeyFilter::Resource(kind)
    }
}
