use std::{
    ops::Deref,
    time::{SystemTime, UNIX_EPOCH},
};

use anyhow::{bail, Error};
use base64::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "Vec<T>", into = "Vec<T>")]
pub struct NonEmptyVec<T: Clone>(Vec<T>);

impl<T: Clone> NonEmptyVec<T> {
    pub fn new(t: T) -> Self {
        Self(vec![t])
    }

    pub fn maybe_new(v: Vec<T>) -> Option<Self> {
        Self::try_from(v).ok()
    }

    pub fn push(&mut self, t: T) {
        self.0.push(t)
    }

    pub fn first(&self) -> &T {
        &self.0[0]
    }

    pub fn into_inner(self) -> Vec<T> {
        self.0
    }
}

impl<T: Clone> TryFrom<Vec<T>> for NonEmptyVec<T> {
    type Error = Error;

    fn try_from(v: Vec<T>) -> Result<NonEmptyVec<T>, Error> {
        if v.is_empty() {
            bail!("cannot create a NonEmptyVec from an empty Vec")
        }
        Ok(NonEmptyVec(v))
    }
}

impl<T: Clone> From<NonEmptyVec<T>> for Vec<T> {
    fn from(NonEmptyVec(v): NonEmptyVec<T>) -> Vec<T> {
        v
    }
}

impl<T: Clone> AsRef<[T]> for NonEmptyVec<T> {
    fn as_ref(&self) -> &[T] {
        &self.0
    }
}

impl<T: Clone> Deref for NonEmptyVec<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.0
    }
}

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

/// A random, URL-safe token carrying `bytes` bytes of entropy.
///
/// Used for nonces, authorization codes, transaction ids and `state` values.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    BASE64_URL_SAFE_NO_PAD.encode(buf)
}

/// Turns a claim name such as `given_name` or `birthDate` into a label such as
/// `Given Name` or `Birth Date`.
pub fn to_human_readable_string(value: impl Into<String>) -> String {
    value
        .into()
        .chars()
        .fold(String::new(), |mut acc, c| {
            // camelCase boundary.
            if c.is_uppercase() {
                acc.push(' ');
            }
            if c == '_' {
                acc.push(' ');
                return acc;
            }
            acc.push(c);
            acc
        })
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn human_readable_labels() {
        assert_eq!(to_human_readable_string("given_name"), "Given Name");
        assert_eq!(to_human_readable_string("birthDate"), "Birth Date");
        assert_eq!(to_human_readable_string("is_over_18"), "Is Over 18");
        assert_eq!(to_human_readable_string("dob"), "Dob");
    }

    #[test]
    fn non_empty_vec_rejects_empty() {
        assert!(NonEmptyVec::<u8>::maybe_new(vec![]).is_none());
        let v: NonEmptyVec<u8> = serde_json::from_str("[1, 2]").unwrap();
        assert_eq!(*v.first(), 1);
        assert!(serde_json::from_str::<NonEmptyVec<u8>>("[]").is_err());
    }

    #[test]
    fn random_tokens_are_distinct() {
        let a = random_token(16);
        assert_eq!(a.len(), 22);
        assert_ne!(a, random_token(16));
    }
}
