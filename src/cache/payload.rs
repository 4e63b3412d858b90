//! Structured payload model.
//!
//! Defines the value tree a cache entry carries and the partition it is
//! routed to. The partition is a pure function of the [`StoredValue`]
//! variant chosen at the API boundary; the store never inspects the payload
//! shape to guess where a value belongs.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::Number;

/// One of the two independent key spaces within a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    /// Remote-fetch results.
    Fetch,
    /// Render/route outputs.
    Route,
}

impl Partition {
    /// Blob namespace this partition's entries live under.
    pub fn namespace(&self) -> &'static str {
        match self {
            Partition::Fetch => "fetch-cache",
            Partition::Route => "route-cache",
        }
    }

    /// Short label used in stats responses and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Partition::Fetch => "fetch",
            Partition::Route => "route",
        }
    }

    /// The opposite partition.
    pub fn other(&self) -> Partition {
        match self {
            Partition::Fetch => Partition::Route,
            Partition::Route => Partition::Fetch,
        }
    }
}

/// An arbitrarily nested structured value.
///
/// `Object` is a plain JSON-style object and passes through the codec
/// natively. `Map` is the order-stable map container for key/value data
/// whose keys may collide with the codec's reserved envelope names; it is
/// re-encoded behind an envelope so its entries survive the round trip
/// untouched. Raw byte buffers may appear at any depth, including inside
/// `Map` entry values.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Null,
    Bool(bool),
    Number(Number),
    Text(String),
    Bytes(Bytes),
    Array(Vec<Payload>),
    Object(BTreeMap<String, Payload>),
    Map(BTreeMap<String, Payload>),
}

impl Payload {
    pub fn text(value: impl Into<String>) -> Self {
        Payload::Text(value.into())
    }

    pub fn bytes(value: impl Into<Bytes>) -> Self {
        Payload::Bytes(value.into())
    }

    pub fn integer(value: i64) -> Self {
        Payload::Number(Number::from(value))
    }
}

/// A payload tagged with the partition it belongs to.
///
/// Callers pick the variant when handing a value to the store; partition
/// assignment never relies on structural marker sniffing.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredValue {
    Fetch(Payload),
    Route(Payload),
}

impl StoredValue {
    pub fn partition(&self) -> Partition {
        match self {
            StoredValue::Fetch(_) => Partition::Fetch,
            StoredValue::Route(_) => Partition::Route,
        }
    }

    pub fn payload(&self) -> &Payload {
        match self {
            StoredValue::Fetch(payload) | StoredValue::Route(payload) => payload,
        }
    }

    pub fn into_payload(self) -> Payload {
        match self {
            StoredValue::Fetch(payload) | StoredValue::Route(payload) => payload,
        }
    }

    /// Rebuild a stored value from a partition and its payload, e.g. when
    /// reading an entry back out of a partition-scoped blob.
    pub fn from_parts(partition: Partition, payload: Payload) -> Self {
        match partition {
            Partition::Fetch => StoredValue::Fetch(payload),
            Partition::Route => StoredValue::Route(payload),
        }
    }
}
