//! Bid events (kind 1077).
//!
//! A bid references its auction through an `e` tag and carries the bid
//! amount as its content. It is the only validator that reads the store:
//! the auction must exist and the bid must beat every stored bid.

use super::{AuctionDescriptor, EventValidator, Verdict};
use crate::nostr::{Event, Filter, KIND_AUCTION, KIND_BID};
use crate::store::EventStore;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// The bid has no usable auction reference or amount.
pub const MALFORMED_BID: &str = "malformed-bid";
/// The referenced auction is not in the store.
pub const AUCTION_NOT_FOUND: &str = "auction-not-found";
/// The bid does not beat the highest stored bid or the starting bid.
pub const BID_TOO_LOW: &str = "bid-too-low";
/// The bid was created after the auction closed.
pub const AUCTION_CLOSED: &str = "auction-closed";

/// Validator for bid events.
pub struct BidValidator {
    store: Arc<dyn EventStore>,
}

impl BidValidator {
    /// Create a bid validator reading from `store`.
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self { store }
    }

    /// Parse a bid amount from event content.
    #[must_use]
    pub fn amount(event: &Event) -> Option<u64> {
        event.content.trim().parse::<u64>().ok().filter(|a| *a > 0)
    }

    async fn highest_bid(&self, auction_id: &str, exclude: &str) -> crate::Result<Option<u64>> {
        let bids = self
            .store
            .query(&Filter::default().kind(KIND_BID).referencing(auction_id))
            .await?;
        Ok(bids
            .iter()
            .filter(|bid| bid.id != exclude)
            .filter_map(Self::amount)
            .max())
    }
}

#[async_trait]
impl EventValidator for BidValidator {
    fn name(&self) -> &'static str {
        "bid"
    }

    async fn validate(&self, event: &Event) -> Verdict {
        let Some(auction_id) = event.tag_value("e").filter(|id| !id.is_empty()) else {
            return Verdict::fail(MALFORMED_BID);
        };
        let Some(amount) = Self::amount(event) else {
            return Verdict::fail(MALFORMED_BID);
        };

        let auction = match self
            .store
            .query(&Filter::id(auction_id).kind(KIND_AUCTION))
            .await
        {
            Ok(found) => found.into_iter().next(),
            Err(e) => {
                warn!("Store query for auction {auction_id} failed: {e}");
                return Verdict::fail("error: could not query store");
            }
        };
        let Some(auction) = auction else {
            return Verdict::fail(AUCTION_NOT_FOUND);
        };

        // Stored auctions were validated on the way in; a descriptor that no
        // longer parses only loses the closing-time and starting-bid checks.
        let descriptor = AuctionDescriptor::parse(&auction).ok();
        if let Some(ref d) = descriptor {
            if event.created_at > d.closing_time {
                return Verdict::fail(AUCTION_CLOSED);
            }
        }

        match self.highest_bid(auction_id, &event.id).await {
            Ok(Some(highest)) if amount <= highest => Verdict::fail(BID_TOO_LOW),
            Ok(Some(_)) => Verdict::Pass,
            Ok(None) => match descriptor {
                Some(d) if amount < d.starting_bid => Verdict::fail(BID_TOO_LOW),
                _ => Verdict::Pass,
            },
            Err(e) => {
                warn!("Store query for bids on {auction_id} failed: {e}");
                Verdict::fail("error: could not query store")
            }
        }
    }
}
