use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LabelParseError {
  #[error("invalid label '{0}', expected key=value")]
  InvalidPair(String),

  #[error("empty label key in '{0}'")]
  EmptyKey(String),
}

/// Parses `key=value[,key=value]*`. Surrounding whitespace is trimmed and
/// an empty string yields no labels.
pub fn parse_labels(value: &str) -> Result<HashMap<String, String>, LabelParseError> {
  let mut labels = HashMap::new();
  if value.trim().is_empty() {
    return Ok(labels);
  }

  for pair in value.split(',') {
    let mut parts = pair.split('=');
    let (key, value) = match (parts.next(), parts.next(), parts.next()) {
      (Some(key), Some(value), None) => (key.trim(), value.trim()),
      _ => return Err(LabelParseError::InvalidPair(pair.to_owned())),
    };

    if key.is_empty() {
      return Err(LabelParseError::EmptyKey(pair.to_owned()));
    }

    labels.insert(key.to_owned(), value.to_owned());
  }

  Ok(labels)
}

/// Merges label sources left to right; later sources win on key collision.
pub fn merge_labels<I>(sources: I) -> HashMap<String, String>
where
  I: IntoIterator<Item = HashMap<String, String>>,
{
  sources.into_iter().fold(HashMap::new(), |mut acc, source| {
    acc.extend(source);
    acc
  })
}
