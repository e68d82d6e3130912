//! Delivery-confirmation reply options
//!
//! A parsed set of named flags carried on requests, encoded on the wire as
//! a `+`-delimited string such as `"RO_NAN+RO_COPY_MSG_ID_TO_CORREL_ID"`.
//! Unrecognized tokens are logged and ignored rather than rejected, for
//! forward compatibility with broker feature additions.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::warn;

/// One recognized reply-option flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReplyFlag {
    /// Explicitly no confirmation requested
    None,
    /// Confirm on delivery
    Cod,
    /// Confirm on arrival
    Coa,
    /// Negative-action notification
    Nan,
    /// Positive-action notification
    Pan,
    /// Responder copies the request's message id into the reply's
    /// correlation id
    CopyMsgIdToCorrelId,
    /// Responder passes the request's correlation id through unchanged
    PassCorrelId,
}

impl ReplyFlag {
    fn token(self) -> &'static str {
        match self {
            ReplyFlag::None => "NONE",
            ReplyFlag::Cod => "RO_COD",
            ReplyFlag::Coa => "RO_COA",
            ReplyFlag::Nan => "RO_NAN",
            ReplyFlag::Pan => "RO_PAN",
            ReplyFlag::CopyMsgIdToCorrelId => "RO_COPY_MSG_ID_TO_CORREL_ID",
            ReplyFlag::PassCorrelId => "RO_PASS_CORREL_ID",
        }
    }

    fn from_token(token: &str) -> Option<Self> {
        match token {
            "NONE" => Some(ReplyFlag::None),
            "RO_COD" => Some(ReplyFlag::Cod),
            "RO_COA" => Some(ReplyFlag::Coa),
            "RO_NAN" => Some(ReplyFlag::Nan),
            "RO_PAN" => Some(ReplyFlag::Pan),
            "RO_COPY_MSG_ID_TO_CORREL_ID" => Some(ReplyFlag::CopyMsgIdToCorrelId),
            "RO_PASS_CORREL_ID" => Some(ReplyFlag::PassCorrelId),
            _ => None,
        }
    }
}

/// A set of reply-option flags. Pure data, no I/O.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyOptions {
    flags: BTreeSet<ReplyFlag>,
}

impl ReplyOptions {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a `+`-delimited flag string, ignoring (and logging)
    /// unrecognized tokens
    pub fn parse(encoded: &str) -> Self {
        let mut flags = BTreeSet::new();
        for token in encoded.split('+') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match ReplyFlag::from_token(token) {
                Some(flag) => {
                    flags.insert(flag);
                }
                None => warn!(token = %token, "ignoring unrecognized reply option"),
            }
        }
        Self { flags }
    }

    /// Add a flag
    pub fn with(mut self, flag: ReplyFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    /// Whether a specific flag is present
    pub fn contains(&self, flag: ReplyFlag) -> bool {
        self.flags.contains(&flag)
    }

    /// True iff the set is non-empty and not exactly `{NONE}`
    pub fn is_set(&self) -> bool {
        !self.flags.is_empty()
            && !(self.flags.len() == 1 && self.flags.contains(&ReplyFlag::None))
    }

    /// Iterate over the flags in canonical order
    pub fn iter(&self) -> impl Iterator<Item = ReplyFlag> + '_ {
        self.flags.iter().copied()
    }
}

impl fmt::Display for ReplyOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined: Vec<&str> = self.flags.iter().map(|flag| flag.token()).collect();
        f.write_str(&joined.join("+"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_two_flags() {
        let opts = ReplyOptions::parse("RO_NAN+RO_PAN");
        assert!(opts.contains(ReplyFlag::Nan));
        assert!(opts.contains(ReplyFlag::Pan));
        assert!(opts.is_set());
    }

    #[test]
    fn test_round_trip_is_order_insensitive() {
        let opts = ReplyOptions::parse("RO_PAN+RO_NAN");
        let reparsed = ReplyOptions::parse(&opts.to_string());
        assert_eq!(opts, reparsed);
    }

    #[test]
    fn test_unknown_tokens_ignored() {
        let opts = ReplyOptions::parse("RO_COD+RO_FUTURE_FEATURE+RO_COA");
        assert!(opts.contains(ReplyFlag::Cod));
        assert!(opts.contains(ReplyFlag::Coa));
        assert_eq!(opts.iter().count(), 2);
    }

    #[test]
    fn test_is_set_semantics() {
        assert!(!ReplyOptions::new().is_set());
        assert!(!ReplyOptions::parse("NONE").is_set());
        assert!(ReplyOptions::parse("NONE+RO_COD").is_set());
        assert!(ReplyOptions::parse("RO_COPY_MSG_ID_TO_CORREL_ID").is_set());
    }

    #[test]
    fn test_empty_and_garbage_input() {
        assert!(!ReplyOptions::parse("").is_set());
        assert!(!ReplyOptions::parse("+++").is_set());
        assert!(!ReplyOptions::parse("RO_BOGUS").is_set());
    }

    fn flag_strategy() -> impl Strategy<Value = ReplyFlag> {
        prop_oneof![
            Just(ReplyFlag::None),
            Just(ReplyFlag::Cod),
            Just(ReplyFlag::Coa),
            Just(ReplyFlag::Nan),
            Just(ReplyFlag::Pan),
            Just(ReplyFlag::CopyMsgIdToCorrelId),
            Just(ReplyFlag::PassCorrelId),
        ]
    }

    proptest! {
        /// Property: parse(to_string(S)) == S for every non-empty subset
        #[test]
        fn prop_round_trip(flags in prop::collection::btree_set(flag_strategy(), 1..7)) {
            let opts = flags
                .iter()
                .fold(ReplyOptions::new(), |acc, flag| acc.with(*flag));
            let reparsed = ReplyOptions::parse(&opts.to_string());
            prop_assert_eq!(opts, reparsed);
        }
    }
}
