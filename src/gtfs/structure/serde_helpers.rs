use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Feeds publish POSIX seconds, sometimes with a fractional part. Kept to the
/// millisecond.
pub fn deserialize_option_unix_date<'de, D>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let f_secs: Option<f64> = Deserialize::deserialize(deserializer)?;
    match f_secs {
        None => Ok(None),
        Some(secs) => {
            let millis = (secs * 1000.0).round() as i64;
            let dt = DateTime::<Utc>::from_timestamp_millis(millis)
                .ok_or_else(|| serde::de::Error::custom("Invalid timestamp"))?;
            Ok(Some(dt))
        }
    }
}

pub fn serialize_option_unix_date<S>(
    value: &Option<DateTime<Utc>>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(dt) if dt.timestamp_subsec_millis() == 0 => serializer.serialize_some(&dt.timestamp()),
        Some(dt) => serializer.serialize_some(&(dt.timestamp_millis() as f64 / 1000.0)),
        None => serializer.serialize_none(),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Many<T> {
    /// Single value
    One(T),
    /// Array of values
    Many(Vec<T>),
}

impl<T> Many<T> {
    pub fn len(&self) -> usize {
        match self {
            Many::One(_) => 1,
            Many::Many(vec) => vec.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> From<Many<T>> for Vec<T> {
    fn from(from: Many<T>) -> Self {
        match from {
            Many::One(val) => vec![val],
            Many::Many(vec) => vec,
        }
    }
}

impl<T> IntoIterator for Many<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        let vec: Vec<T> = self.into();
        vec.into_iter()
    }
}

/// Some publishers quote numeric fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MaybeStringWrapped<T> {
    Str(String),
    Val(T),
}

impl<T: FromStr> MaybeStringWrapped<T> {
    pub fn into_inner(self) -> Result<T, T::Err> {
        match self {
            MaybeStringWrapped::Str(s) => s.parse(),
            MaybeStringWrapped::Val(v) => Ok(v),
        }
    }
}
