//! Custody transfer manager: custodian-chain rewriting on accept/refuse,
//! aggregate custody signal (ACS) fill accumulation, and RFC 5050 signal
//! and status-report synthesis.
//!
//! A node that understands ACS aggregates the outcome of many custody
//! decisions about one previous custodian into a single periodically-sent
//! bundle rather than emitting one signal per transfer; a node talking to
//! an ACS-unaware peer falls back to RFC 5050's original one-signal-per-
//! bundle behavior. Which mode applies to a given bundle is a property of
//! the *previous custodian*, not of this manager, so every entry point
//! takes it as a parameter.

use crate::block::{Acs, AdminRecord, Block, BundleStatusReport, CanonicalBlock, CustodyIdRange,
    CustodySignal, Cteb, Reason, SignalTime, Type};
use crate::bundle::BundleView;
use crate::creation_timestamp::CreationTimestamp;
use crate::eid::Eid;
use crate::error::Error;
use crate::fragment::coalesce_insert;
use crate::primary_block::PrimaryBlock;
use std::collections::HashMap;

/// Fixed lifetime given to every signal and ACS bundle this manager emits.
pub const SIGNAL_LIFETIME_SECS: u64 = 1000;

/// Number of reason slots tracked per custodian. By convention, index 0
/// aggregates accepted transfers ("success"); indices 1 through 6 aggregate
/// refusals, keyed by the low bits of the refusal's [`Reason`] code.
const NUM_REASON_SLOTS: usize = 7;

#[derive(Debug, Clone)]
struct PendingAcs {
    succeeded: bool,
    reason: Reason,
    ranges: Vec<CustodyIdRange>,
}

/// Custodian-chain rewriting and signal synthesis for one local custodian
/// identity.
pub struct CustodyManager {
    own_custodian: Eid,
    last_creation: u64,
    sequence: u64,
    acs_table: HashMap<Eid, [Option<PendingAcs>; NUM_REASON_SLOTS]>,
    largest_number_of_fills: usize,
}

impl CustodyManager {
    pub fn new(own_custodian: Eid) -> Self {
        Self {
            own_custodian,
            last_creation: 0,
            sequence: 0,
            acs_table: HashMap::new(),
            largest_number_of_fills: 0,
        }
    }

    pub fn own_custodian(&self) -> Eid {
        self.own_custodian
    }

    /// The largest number of coalesced fills seen in any single ACS record
    /// since the last flush, used by a scheduler as a flow-control signal
    /// for when to call [`Self::generate_all_acs_bundles_and_clear`].
    pub fn largest_number_of_fills(&self) -> usize {
        self.largest_number_of_fills
    }

    /// Allocates a creation timestamp for a bundle originated right now:
    /// resets the sequence counter on a new second, then issues and
    /// increments it.
    pub fn set_creation_and_sequence(&mut self, now_dtn_secs: u64) -> CreationTimestamp {
        if now_dtn_secs != self.last_creation {
            self.sequence = 0;
            self.last_creation = now_dtn_secs;
        }
        let sequence = self.sequence;
        self.sequence += 1;
        CreationTimestamp::new(now_dtn_secs, sequence)
    }

    /// Applies a custody accept/refuse decision to an ingress bundle,
    /// rewriting its custodian chain in place and returning an RFC 5050
    /// signal bundle to send immediately, or `None` if the outcome was
    /// folded into an aggregate signal instead.
    ///
    /// `reason_idx` selects both the per-custodian ACS slot and (via
    /// [`Reason::from`]) the reason code carried on any RFC 5050 signal;
    /// callers should pass 0 for an accept.
    pub fn process_custody_of_bundle(
        &mut self,
        bv: &mut BundleView,
        accept: bool,
        new_custody_id: u64,
        reason_idx: u8,
        acs_aware: bool,
        now_dtn_secs: u64,
    ) -> Result<Option<BundleView>, Error> {
        bv.payload_size().ok_or(Error::MissingPayload)?;
        let primary = bv.primary.clone();
        let reason = Reason::from(reason_idx);

        let received_cteb_custody_id = if acs_aware {
            bv.cteb()?.and_then(|cteb| {
                (cteb.creator == primary.custodian).then_some(cteb.custody_id)
            })
        } else {
            None
        };

        if let Some(acs_custody_id) = received_cteb_custody_id {
            self.aggregate(primary.custodian, accept, reason_idx, reason, acs_custody_id);
            if accept {
                bv.primary.custodian = self.own_custodian;
                bv.touch_primary();
                self.rewrite_cteb(bv, new_custody_id);
            }
            return Ok(None);
        }

        // ACS-unaware custodian, or ACS-aware with a missing/invalid CTEB:
        // always a single-bundle RFC 5050 signal.
        let signal = self.build_custody_signal_bundle(
            primary.custodian,
            &primary,
            accept,
            reason,
            now_dtn_secs,
        )?;

        if accept {
            bv.primary.custodian = self.own_custodian;
            bv.touch_primary();
            if acs_aware {
                self.rewrite_cteb(bv, new_custody_id);
            }
        }

        Ok(Some(signal))
    }

    fn aggregate(&mut self, custodian: Eid, succeeded: bool, reason_idx: u8, reason: Reason, custody_id: u64) {
        let idx = (reason_idx as usize).min(NUM_REASON_SLOTS - 1);
        let slots = self
            .acs_table
            .entry(custodian)
            .or_insert_with(|| std::array::from_fn(|_| None));
        let entry = slots[idx].get_or_insert_with(|| PendingAcs {
            succeeded,
            reason,
            ranges: Vec::new(),
        });
        coalesce_insert(&mut entry.ranges, custody_id..custody_id + 1);
        self.largest_number_of_fills = self.largest_number_of_fills.max(entry.ranges.len());
    }

    fn rewrite_cteb(&self, bv: &mut BundleView, custody_id: u64) {
        for view in bv.blocks_mut().iter_mut() {
            if view.block().block_type() == Type::CustodyTransferEnhancement {
                view.block_mut().content =
                    CanonicalBlock::Cteb(Cteb::new(custody_id, self.own_custodian));
                return;
            }
        }
        bv.append_canonical(Block::new(CanonicalBlock::Cteb(Cteb::new(
            custody_id,
            self.own_custodian,
        ))));
    }

    fn build_custody_signal_bundle(
        &mut self,
        target_custodian: Eid,
        primary: &PrimaryBlock,
        succeeded: bool,
        reason: Reason,
        now_dtn_secs: u64,
    ) -> Result<BundleView, Error> {
        let signal = CustodySignal {
            succeeded,
            reason,
            fragment: primary.fragment,
            signal_time: SignalTime {
                seconds: now_dtn_secs,
                nanoseconds: 0,
            },
            bundle_creation_timestamp: primary.creation_timestamp,
            subject_source_eid: primary.source,
        };
        self.build_admin_bundle(target_custodian, AdminRecord::CustodySignal(signal), now_dtn_secs)
    }

    /// Builds one administrative-record bundle: `SINGLETON | NOFRAGMENT |
    /// ADMINRECORD`, addressed from our own custodian, with a fixed
    /// [`SIGNAL_LIFETIME_SECS`] lifetime.
    fn build_admin_bundle(
        &mut self,
        destination: Eid,
        record: AdminRecord,
        now_dtn_secs: u64,
    ) -> Result<BundleView, Error> {
        let mut primary = PrimaryBlock::new(
            destination,
            self.own_custodian,
            Eid::NULL,
            self.own_custodian,
            SIGNAL_LIFETIME_SECS,
        );
        primary.flags.destination_is_singleton = true;
        primary.flags.do_not_fragment = true;
        primary.flags.is_admin_record = true;
        primary.creation_timestamp = self.set_creation_and_sequence(now_dtn_secs);

        let mut payload = Vec::new();
        record.serialize(&mut payload);

        let mut view = BundleView::new(primary);
        view.append_canonical(Block::new(CanonicalBlock::Payload(bytes::Bytes::from(
            payload,
        ))));
        let max_bytes = view.serialized_size() as usize + 64;
        view.render(max_bytes)?;
        Ok(view)
    }

    /// Builds an ACS bundle from the accumulated fills for `(custodian,
    /// reason_idx)`, or `None` if that slot is empty. With `copy_only` the
    /// fill set is left in place for a future flush; otherwise it is
    /// cleared so the same custody IDs are never sent twice.
    pub fn generate_acs_bundle(
        &mut self,
        custodian: Eid,
        reason_idx: u8,
        copy_only: bool,
        now_dtn_secs: u64,
    ) -> Result<Option<BundleView>, Error> {
        let idx = (reason_idx as usize).min(NUM_REASON_SLOTS - 1);
        let acs = {
            let Some(slots) = self.acs_table.get_mut(&custodian) else {
                return Ok(None);
            };
            let Some(pending) = &slots[idx] else {
                return Ok(None);
            };
            if pending.ranges.is_empty() {
                return Ok(None);
            }
            let acs = Acs {
                succeeded: pending.succeeded,
                reason: pending.reason,
                ranges: pending.ranges.clone(),
            };
            if !copy_only {
                slots[idx] = None;
            }
            acs
        };

        self.build_admin_bundle(custodian, AdminRecord::Acs(acs), now_dtn_secs)
            .map(Some)
    }

    /// Flushes every non-empty `(custodian, reason_idx)` ACS slot into one
    /// bundle each, clears them, and resets
    /// [`Self::largest_number_of_fills`] to zero.
    pub fn generate_all_acs_bundles_and_clear(
        &mut self,
        now_dtn_secs: u64,
    ) -> Result<Vec<BundleView>, Error> {
        let mut out = Vec::new();
        let custodians: Vec<Eid> = self.acs_table.keys().copied().collect();
        for custodian in custodians {
            for idx in 0..NUM_REASON_SLOTS as u8 {
                if let Some(bv) = self.generate_acs_bundle(custodian, idx, false, now_dtn_secs)? {
                    out.push(bv);
                }
            }
        }
        self.acs_table.retain(|_, slots| slots.iter().any(Option::is_some));
        self.largest_number_of_fills = 0;
        Ok(out)
    }

    /// Composes a `BundleStatusReport` announcing that a bundle was deleted
    /// for exceeding its lifetime, addressed to the deleted bundle's
    /// report-to endpoint.
    pub fn generate_bundle_deletion_status_report(
        &mut self,
        primary_of_deleted: &PrimaryBlock,
        now_dtn_secs: u64,
    ) -> Result<BundleView, Error> {
        let report = BundleStatusReport {
            reason: Some(Reason::LifetimeExpired),
            fragment: primary_of_deleted.fragment,
            deleted: Some(SignalTime {
                seconds: now_dtn_secs,
                nanoseconds: 0,
            }),
            bundle_creation_timestamp: primary_of_deleted.creation_timestamp,
            source_eid: primary_of_deleted.source,
            ..Default::default()
        };
        self.build_admin_bundle(
            primary_of_deleted.report_to,
            AdminRecord::BundleStatusReport(report),
            now_dtn_secs,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn ingress_bundle(custodian: Eid, cteb: Option<Cteb>) -> BundleView {
        let primary = PrimaryBlock::new(Eid::new(9, 1), Eid::new(100, 1), Eid::NULL, custodian, 3600);
        let mut view = BundleView::new(primary);
        if let Some(cteb) = cteb {
            view.append_canonical(Block::new(CanonicalBlock::Cteb(cteb)));
        }
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"x"))));
        view.render(4096).unwrap();
        view
    }

    #[test]
    fn accept_with_valid_cteb_aggregates_into_acs_and_rewrites_bundle() {
        let own = Eid::new(200, 2);
        let previous = Eid::new(100, 1);
        let mut mgr = CustodyManager::new(own);

        let mut bv = ingress_bundle(previous, Some(Cteb::new(10, previous)));
        let signal = mgr
            .process_custody_of_bundle(&mut bv, true, 11, 0, true, 1000)
            .unwrap();

        assert!(signal.is_none());
        assert_eq!(bv.primary.custodian, own);
        let cteb = bv.cteb().unwrap().unwrap();
        assert_eq!(cteb.custody_id, 11);
        assert_eq!(cteb.creator, own);

        let acs_bundle = mgr.generate_acs_bundle(previous, 0, false, 1001).unwrap().unwrap();
        let record = acs_bundle.admin_record().unwrap().unwrap();
        match record {
            AdminRecord::Acs(acs) => {
                assert!(acs.succeeded);
                assert_eq!(acs.ranges, vec![10..11]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn accept_with_invalid_cteb_emits_single_bundle_signal() {
        let own = Eid::new(200, 2);
        let previous = Eid::new(100, 1);
        let wrong_creator = Eid::new(400, 4);
        let mut mgr = CustodyManager::new(own);

        let mut bv = ingress_bundle(previous, Some(Cteb::new(10, wrong_creator)));
        let signal = mgr
            .process_custody_of_bundle(&mut bv, true, 11, 0, true, 1000)
            .unwrap()
            .expect("invalid CTEB must emit a direct signal");

        assert_eq!(signal.primary.source, own);
        assert_eq!(signal.primary.destination, previous);
        match signal.admin_record().unwrap().unwrap() {
            AdminRecord::CustodySignal(sig) => assert!(sig.succeeded),
            _ => panic!("wrong variant"),
        }

        assert_eq!(bv.primary.custodian, own);
        let cteb = bv.cteb().unwrap().unwrap();
        assert_eq!(cteb.custody_id, 11);
        assert_eq!(cteb.creator, own);
    }

    #[test]
    fn non_acs_aware_accept_always_emits_a_signal_and_skips_cteb() {
        let own = Eid::new(200, 2);
        let previous = Eid::new(100, 1);
        let mut mgr = CustodyManager::new(own);

        let mut bv = ingress_bundle(previous, Some(Cteb::new(10, previous)));
        let signal = mgr
            .process_custody_of_bundle(&mut bv, true, 11, 0, false, 1000)
            .unwrap();
        assert!(signal.is_some());
        assert_eq!(bv.primary.custodian, own);
        // Non-ACS-aware mode leaves custody bookkeeping to the signal alone.
        assert_eq!(bv.cteb().unwrap().unwrap().custody_id, 10);
    }

    #[test]
    fn refuse_with_valid_cteb_aggregates_failure_without_rewriting_custodian() {
        let own = Eid::new(200, 2);
        let previous = Eid::new(100, 1);
        let mut mgr = CustodyManager::new(own);

        let mut bv = ingress_bundle(previous, Some(Cteb::new(10, previous)));
        let signal = mgr
            .process_custody_of_bundle(&mut bv, false, 0, 4, true, 1000)
            .unwrap();
        assert!(signal.is_none());
        assert_eq!(bv.primary.custodian, previous);

        let acs_bundle = mgr.generate_acs_bundle(previous, 4, false, 1001).unwrap().unwrap();
        match acs_bundle.admin_record().unwrap().unwrap() {
            AdminRecord::Acs(acs) => {
                assert!(!acs.succeeded);
                assert_eq!(acs.reason, Reason::DepletedStorage);
                assert_eq!(acs.ranges, vec![10..11]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn generate_all_acs_bundles_and_clear_flushes_every_pending_fill_set() {
        let own = Eid::new(200, 2);
        let a = Eid::new(100, 1);
        let b = Eid::new(101, 1);
        let mut mgr = CustodyManager::new(own);

        let mut bv_a = ingress_bundle(a, Some(Cteb::new(1, a)));
        mgr.process_custody_of_bundle(&mut bv_a, true, 2, 0, true, 1000).unwrap();
        let mut bv_b = ingress_bundle(b, Some(Cteb::new(5, b)));
        mgr.process_custody_of_bundle(&mut bv_b, true, 6, 0, true, 1000).unwrap();

        let bundles = mgr.generate_all_acs_bundles_and_clear(1002).unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(mgr.largest_number_of_fills(), 0);

        assert!(mgr.generate_acs_bundle(a, 0, false, 1003).unwrap().is_none());
        assert!(mgr.generate_acs_bundle(b, 0, false, 1003).unwrap().is_none());
    }

    #[test]
    fn creation_and_sequence_resets_on_new_second() {
        let mut mgr = CustodyManager::new(Eid::new(200, 2));
        let t0 = mgr.set_creation_and_sequence(1000);
        let t1 = mgr.set_creation_and_sequence(1000);
        let t2 = mgr.set_creation_and_sequence(1001);
        assert_eq!((t0.time, t0.sequence), (1000, 0));
        assert_eq!((t1.time, t1.sequence), (1000, 1));
        assert_eq!((t2.time, t2.sequence), (1001, 0));
    }

    #[test]
    fn deletion_status_report_carries_deleted_event_and_reason() {
        let mut mgr = CustodyManager::new(Eid::new(200, 2));
        let deleted_primary = PrimaryBlock::new(
            Eid::new(9, 1),
            Eid::new(100, 1),
            Eid::new(50, 1),
            Eid::new(100, 1),
            10,
        );
        let report_bundle = mgr
            .generate_bundle_deletion_status_report(&deleted_primary, 2000)
            .unwrap();
        assert_eq!(report_bundle.primary.destination, Eid::new(50, 1));
        match report_bundle.admin_record().unwrap().unwrap() {
            AdminRecord::BundleStatusReport(r) => {
                assert_eq!(r.reason, Some(Reason::LifetimeExpired));
                assert!(r.deleted.is_some());
                assert_eq!(r.source_eid, Eid::new(100, 1));
            }
            _ => panic!("wrong variant"),
        }
    }
}
