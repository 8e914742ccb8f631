//! Auction-creation events (kind 33222).
//!
//! The content is a JSON object describing the auction:
//!
//! ```json
//! {
//!   "description": "Hand-thrown teapot",
//!   "starting_bid": 1000,
//!   "currency": "sat",
//!   "closing_time": 1735689600
//! }
//! ```
//!
//! Auctions are parameterised-replaceable, so they must also carry a `d`
//! tag.

use super::{EventValidator, Verdict};
use crate::nostr::Event;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// A parsed auction descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuctionDescriptor {
    /// Item being auctioned.
    pub description: String,
    /// Minimum first bid.
    pub starting_bid: u64,
    /// Currency or unit of the bids.
    pub currency: String,
    /// Unix time after which bids are refused.
    pub closing_time: u64,
}

impl AuctionDescriptor {
    /// Parse and check the descriptor carried by `event`.
    ///
    /// # Errors
    ///
    /// Returns the rejection reason naming the first missing or invalid
    /// field.
    pub fn parse(event: &Event) -> Result<Self, String> {
        let value: Value = serde_json::from_str(&event.content)
            .map_err(|_| "malformed auction descriptor".to_string())?;
        let Value::Object(fields) = value else {
            return Err("malformed auction descriptor".to_string());
        };

        let description = match non_empty_str(&fields, "description") {
            Some(d) => d.to_string(),
            None => return Err("missing item description".to_string()),
        };

        let starting_bid = match fields.get("starting_bid") {
            None | Some(Value::Null) => return Err("missing starting bid".to_string()),
            Some(v) => match v.as_u64() {
                Some(bid) if bid > 0 => bid,
                _ => return Err("starting bid must be a positive integer".to_string()),
            },
        };

        let currency = match non_empty_str(&fields, "currency") {
            Some(c) => c.to_string(),
            None => return Err("missing currency".to_string()),
        };

        let closing_time = match fields.get("closing_time") {
            None | Some(Value::Null) => return Err("missing closing time".to_string()),
            Some(v) => v
                .as_u64()
                .ok_or_else(|| "closing time must be a unix timestamp".to_string())?,
        };
        if closing_time <= event.created_at {
            return Err("closing time must be after creation time".to_string());
        }

        Ok(Self {
            description,
            starting_bid,
            currency,
            closing_time,
        })
    }
}

fn non_empty_str<'a>(fields: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Validator for auction-creation events.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuctionValidator;

#[async_trait]
impl EventValidator for AuctionValidator {
    fn name(&self) -> &'static str {
        "auction"
    }

    async fn validate(&self, event: &Event) -> Verdict {
        if let Err(reason) = AuctionDescriptor::parse(event) {
            return Verdict::Fail(reason);
        }
        if event.tag_value("d").map_or(true, str::is_empty) {
            return Verdict::fail("missing d tag");
        }
        Verdict::Pass
    }
}
