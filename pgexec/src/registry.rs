//! Binary format negotiation.
use std::collections::HashSet;

use crate::postgres::{Oid, PgFormat, oid};

/// Types the server may return in binary by default.
pub const DEFAULT_RECEIVE: &[Oid] = &[
    oid::BOOL,
    oid::BYTEA,
    oid::INT2,
    oid::INT4,
    oid::INT8,
    oid::OID,
    oid::FLOAT4,
    oid::FLOAT8,
    oid::UUID,
    oid::DATE,
    oid::TIME,
    oid::TIMESTAMP,
    oid::TIMESTAMPTZ,
];

/// Types the client sends in binary by default.
pub const DEFAULT_SEND: &[Oid] = &[
    oid::BYTEA,
    oid::INT2,
    oid::INT4,
    oid::INT8,
    oid::FLOAT4,
    oid::FLOAT8,
    oid::UUID,
];

/// Two independent sets of type oids deciding the wire format per value.
///
/// The receive set controls which result columns are requested in binary, the send set
/// controls which parameters may be bound in binary. Changes apply to the next execution.
#[derive(Debug, Clone)]
pub struct BinaryFormatRegistry {
    send: HashSet<Oid>,
    receive: HashSet<Oid>,
}

impl Default for BinaryFormatRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SEND.iter().copied(), DEFAULT_RECEIVE.iter().copied())
    }
}

impl BinaryFormatRegistry {
    pub fn new(send: impl IntoIterator<Item = Oid>, receive: impl IntoIterator<Item = Oid>) -> Self {
        Self {
            send: send.into_iter().collect(),
            receive: receive.into_iter().collect(),
        }
    }

    /// Registry with both sets empty, everything travels as text.
    pub fn empty() -> Self {
        Self { send: HashSet::new(), receive: HashSet::new() }
    }

    /// Returns `true` if the oid was not present.
    pub fn add_send(&mut self, oid: Oid) -> bool {
        self.send.insert(oid)
    }

    /// Returns `true` if the oid was present.
    pub fn remove_send(&mut self, oid: Oid) -> bool {
        self.send.remove(&oid)
    }

    pub fn contains_send(&self, oid: Oid) -> bool {
        self.send.contains(&oid)
    }

    pub fn set_send(&mut self, oids: impl IntoIterator<Item = Oid>) {
        self.send = oids.into_iter().collect();
    }

    pub fn send_oids(&self) -> Vec<Oid> {
        sorted(&self.send)
    }

    /// Returns `true` if the oid was not present.
    pub fn add_receive(&mut self, oid: Oid) -> bool {
        self.receive.insert(oid)
    }

    /// Returns `true` if the oid was present.
    pub fn remove_receive(&mut self, oid: Oid) -> bool {
        self.receive.remove(&oid)
    }

    pub fn contains_receive(&self, oid: Oid) -> bool {
        self.receive.contains(&oid)
    }

    pub fn set_receive(&mut self, oids: impl IntoIterator<Item = Oid>) {
        self.receive = oids.into_iter().collect();
    }

    pub fn receive_oids(&self) -> Vec<Oid> {
        sorted(&self.receive)
    }

    /// Format to request for a result column of type `oid`.
    pub fn result_format(&self, oid: Oid) -> PgFormat {
        match self.receive.contains(&oid) {
            true => PgFormat::Binary,
            false => PgFormat::Text,
        }
    }

    /// Result formats for a whole row shape, collapsed to the shortest equivalent list.
    ///
    /// An empty list means all text, a single entry applies to every column.
    pub(crate) fn result_formats(&self, oids: impl ExactSizeIterator<Item = Oid>) -> Vec<PgFormat> {
        let formats: Vec<_> = oids.map(|oid| self.result_format(oid)).collect();
        if formats.iter().all(|f| !f.is_binary()) {
            return vec![];
        }
        if formats.iter().all(PgFormat::is_binary) {
            return vec![PgFormat::Binary];
        }
        formats
    }
}

fn sorted(set: &HashSet<Oid>) -> Vec<Oid> {
    let mut oids: Vec<_> = set.iter().copied().collect();
    oids.sort_unstable();
    oids
}
