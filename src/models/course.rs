use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Catalog entry, keyed by a user-chosen `course_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub course_id: String,
    pub title: String,
    /// Sent as `""` when absent.
    #[serde(default, serialize_with = "none_as_empty")]
    pub description: Option<String>,
    /// Order is preserved; duplicates and dangling ids are allowed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub prerequisite_ids: Vec<String>,
}

impl Course {
    pub fn new(course_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            course_id: course_id.into(),
            title: title.into(),
            description: None,
            prerequisite_ids: Vec::new(),
        }
    }

    pub fn description_text(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }
}

pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn none_as_empty<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(value.as_deref().unwrap_or(""))
}
