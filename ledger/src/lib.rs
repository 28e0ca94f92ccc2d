// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Meridian Ledger — Validator Core
//!
//! The consensus and docket-lifecycle core of a Meridian validator node.
//! A Meridian deployment runs many independent *registers* — permissioned,
//! linearly ordered ledgers — and each register's validator cohort
//! proposes *dockets* (blocks of typed transactions), agrees on them by
//! threshold signature, and persists the confirmed chain to shared
//! register storage.
//!
//! ## Architecture
//!
//! The crate is split along the lifecycle of a transaction:
//!
//! - **model** — the shared vocabulary: transactions, dockets, votes,
//!   validators, rosters, blueprints.
//! - **crypto** — SHA-256, canonical JSON, and Merkle commitments. The
//!   only hashing rules in the system; everything consensus-visible is
//!   recomputable from them.
//! - **services** — narrow traits for the external collaborators
//!   (register storage, wallet, blueprints, peers, key-value store) plus
//!   in-memory implementations that back dev mode and tests.
//! - **validation** — the pre-admission pipeline: structure, timing,
//!   payload hash, blueprint schema, signatures, chain linkage, and
//!   governance rights.
//! - **mempool** — priority-ordered admission queues and the bounded
//!   verified-transaction buffer.
//! - **blueprint** — read-through blueprint cache and chain-walking
//!   version resolution.
//! - **registry** — the persistent per-register validator set and
//!   consensus configuration.
//! - **consensus** — leader election, docket building, vote collection,
//!   the consensus engine, failure handling, confirmed-docket
//!   verification, and control-transaction application.
//! - **orchestrator** — the tick loop that drives it all.
//!
//! ## Design stance
//!
//! 1. External collaborators are capabilities, not clients. Everything
//!    I/O-shaped hides behind a trait and swaps out wholesale in tests.
//! 2. Consensus paths return results, not panics. The tick loop must
//!    survive anything a peer can put on the wire.
//! 3. Every commitment is recomputable: payload hashes, Merkle roots,
//!    and docket hashes are functions of canonical bytes, never of
//!    serializer mood.

pub mod blueprint;
pub mod config;
pub mod consensus;
pub mod crypto;
pub mod events;
pub mod mempool;
pub mod model;
pub mod orchestrator;
pub mod registry;
pub mod services;
pub mod validation;
