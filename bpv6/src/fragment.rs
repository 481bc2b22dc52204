//! Proactive bundle fragmentation and reassembly.
//!
//! A payload too large for the next hop's link is split into a run of
//! sibling bundles that each carry a slice of the original application data
//! unit (ADU) plus enough of the original primary block to let a receiver
//! recompute where that slice belongs. Blocks other than the payload are
//! distributed once each: blocks that sat before the payload in the
//! original bundle travel with the first fragment, blocks that sat after it
//! travel with the last, and any block carrying
//! `MUST_BE_REPLICATED_IN_EVERY_FRAGMENT` is copied into every fragment
//! regardless of its original position.

use crate::block::{Block, CanonicalBlock, Type};
use crate::bundle::BundleView;
use crate::creation_timestamp::CreationTimestamp;
use crate::eid::Eid;
use crate::error::Error;
use bytes::Bytes;
use std::collections::HashMap;
use std::ops::Range;
use std::sync::Mutex;

/// A coalescing set of non-negative integer ranges, used to track which
/// slices of an ADU have been seen across a fragment run.
#[derive(Debug, Clone, Default)]
struct FragmentSet {
    ranges: Vec<Range<u64>>,
}

impl FragmentSet {
    fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// Inserts `range`, merging it with any existing range it overlaps or
    /// abuts.
    fn insert(&mut self, range: Range<u64>) {
        coalesce_insert(&mut self.ranges, range);
    }

    /// True iff `range` is entirely covered by a single merged range already
    /// present (true in turn iff the set is fully coalesced and holds
    /// exactly `range`, the only shape the caller ever checks for).
    fn contains_entirely(&self, range: Range<u64>) -> bool {
        self.ranges.iter().any(|r| r.start <= range.start && r.end >= range.end)
    }
}

/// Inserts `range` into `ranges`, merging it with any entry it overlaps or
/// abuts, keeping `ranges` sorted and disjoint. Shared by the fragment
/// coverage tracker and the custody manager's per-custodian ACS fill sets.
pub(crate) fn coalesce_insert(ranges: &mut Vec<Range<u64>>, range: Range<u64>) {
    if range.is_empty() {
        return;
    }
    let mut start = range.start;
    let mut end = range.end;
    ranges.retain(|r| {
        if r.end < start || r.start > end {
            true
        } else {
            start = start.min(r.start);
            end = end.max(r.end);
            false
        }
    });
    let pos = ranges.partition_point(|r| r.start < start);
    ranges.insert(pos, start..end);
}

fn calc_num_fragments(payload_size: u64, fragment_size: u64) -> u64 {
    payload_size.div_ceil(fragment_size)
}

/// Splits `bundle` into a run of fragments, each carrying at most
/// `fragment_size` bytes of payload.
///
/// Rejects a zero `fragment_size`, a bundle flagged `DONOTFRAGMENT`, a
/// bundle with no payload block (or more than one), and a `fragment_size`
/// that is not strictly smaller than the payload.
pub fn fragment(bundle: &BundleView, fragment_size: u64) -> Result<Vec<BundleView>, Error> {
    if bundle.primary.flags.do_not_fragment {
        return Err(Error::DoNotFragment);
    }

    let payload_index = bundle
        .blocks()
        .iter()
        .position(|v| v.block().block_type() == Type::Payload)
        .ok_or(Error::MissingPayload)?;
    let CanonicalBlock::Payload(payload_bytes) = &bundle.blocks()[payload_index].block().content
    else {
        return Err(Error::MissingPayload);
    };
    let payload_size = payload_bytes.len() as u64;

    if fragment_size == 0 || fragment_size >= payload_size {
        return Err(Error::InvalidFragmentSize(fragment_size, payload_size));
    }

    let (base_offset, total_adu_len) = match bundle.primary.fragment {
        Some((offset, total)) => (offset, total),
        None => (0, payload_size),
    };

    let num_fragments = calc_num_fragments(payload_size, fragment_size);
    let mut fragment_blocks: Vec<Vec<Block>> = vec![Vec::new(); num_fragments as usize];

    for (idx, view) in bundle.blocks().iter().enumerate() {
        if idx == payload_index {
            for (k, slot) in fragment_blocks.iter_mut().enumerate() {
                let start = k as u64 * fragment_size;
                let end = (start + fragment_size).min(payload_size);
                let slice = payload_bytes.slice(start as usize..end as usize);
                let mut b = Block::new(CanonicalBlock::Payload(slice));
                b.flags = view.block().flags.clone();
                slot.push(b);
            }
            continue;
        }

        let block = view.block().clone();
        if block.flags.must_replicate_in_every_fragment {
            for slot in fragment_blocks.iter_mut() {
                slot.push(block.clone());
            }
        } else if idx < payload_index {
            fragment_blocks[0].push(block);
        } else {
            fragment_blocks[num_fragments as usize - 1].push(block);
        }
    }

    let max_bytes = bundle.serialized_size() as usize + 64;
    let mut out = Vec::with_capacity(num_fragments as usize);
    for (k, blocks) in fragment_blocks.into_iter().enumerate() {
        let start = k as u64 * fragment_size;

        let mut primary = bundle.primary.clone();
        primary.flags.is_fragment = true;
        primary.fragment = Some((base_offset + start, total_adu_len));

        let mut view = BundleView::new(primary);
        for block in blocks {
            view.append_canonical(block);
        }
        view.render(max_bytes)?;
        out.push(view);
    }

    Ok(out)
}

/// Reassembles a complete bundle from a run of fragments produced by
/// [`fragment`] (or received individually off the wire).
///
/// All fragments must agree on source, destination, creation timestamp,
/// lifetime and total ADU length, and must together cover
/// `[0, total_adu_len)` with no gaps. Non-payload blocks are taken from
/// whichever fragment originally carried them: the fragment with the
/// lowest offset supplies the blocks that preceded the payload, and the
/// fragment with the highest offset supplies the blocks that followed it.
pub fn assemble(fragments: &[BundleView]) -> Result<BundleView, Error> {
    let Some(first) = fragments.first() else {
        return Err(Error::IncompleteFragmentSet(0));
    };
    if !first.primary.is_fragment() {
        return Err(Error::NotAFragment);
    }
    let Some((_, total_adu_len)) = first.primary.fragment else {
        return Err(Error::NotAFragment);
    };

    for f in fragments {
        if !f.primary.is_fragment() {
            return Err(Error::NotAFragment);
        }
        let identity_matches = f.primary.source == first.primary.source
            && f.primary.destination == first.primary.destination
            && f.primary.creation_timestamp == first.primary.creation_timestamp
            && f.primary.lifetime == first.primary.lifetime
            && f.primary.fragment.map(|(_, total)| total) == Some(total_adu_len);
        if !identity_matches {
            return Err(Error::MismatchedFragments);
        }
    }

    let mut coverage = FragmentSet::new();
    for f in fragments {
        let (offset, _) = f.primary.fragment.expect("checked above");
        let payload_len = f.payload_size().ok_or(Error::MissingPayload)?;
        coverage.insert(offset..offset + payload_len);
    }
    if !coverage.contains_entirely(0..total_adu_len) {
        return Err(Error::IncompleteFragmentSet(total_adu_len));
    }

    let mut ordered: Vec<&BundleView> = fragments.iter().collect();
    ordered.sort_by_key(|f| f.primary.fragment.expect("checked above").0);

    let mut assembled_payload = vec![0u8; total_adu_len as usize];
    for f in &ordered {
        let (offset, _) = f.primary.fragment.expect("checked above");
        let CanonicalBlock::Payload(bytes) = &f
            .payload()
            .ok_or(Error::MissingPayload)?
            .content
        else {
            return Err(Error::MissingPayload);
        };
        let start = offset as usize;
        assembled_payload[start..start + bytes.len()].copy_from_slice(bytes);
    }

    let lowest = ordered.first().expect("fragments non-empty");
    let highest = ordered.last().expect("fragments non-empty");

    let lowest_payload_index = lowest
        .blocks()
        .iter()
        .position(|v| v.block().block_type() == Type::Payload)
        .ok_or(Error::MissingPayload)?;
    let highest_payload_index = highest
        .blocks()
        .iter()
        .position(|v| v.block().block_type() == Type::Payload)
        .ok_or(Error::MissingPayload)?;

    let mut primary = first.primary.clone();
    primary.flags.is_fragment = false;
    primary.fragment = None;

    let mut view = BundleView::new(primary);
    for b in &lowest.blocks()[..lowest_payload_index] {
        view.append_canonical(b.block().clone());
    }
    view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from(
        assembled_payload,
    ))));
    for b in &highest.blocks()[highest_payload_index + 1..] {
        view.append_canonical(b.block().clone());
    }

    let max_bytes = total_adu_len as usize + 4096;
    view.render(max_bytes)?;
    Ok(view)
}

struct FragmentEntry {
    total_adu_len: u64,
    coverage: FragmentSet,
    fragments: Vec<BundleView>,
}

/// Tracks in-progress fragment runs keyed by the identity fields a receiver
/// can always determine from an individual fragment's primary block:
/// source endpoint and creation timestamp.
#[derive(Default)]
pub struct FragmentManager {
    entries: HashMap<(Eid, CreationTimestamp), FragmentEntry>,
}

impl FragmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one fragment's wire bytes into the manager. Returns the
    /// reassembled bundle once every byte of its ADU has been seen, or
    /// `None` while the run is still incomplete.
    pub fn add_fragment(&mut self, data: &[u8]) -> Result<Option<BundleView>, Error> {
        let probe = BundleView::load_primary_only(data)?;
        if !probe.primary.is_fragment() {
            return Err(Error::NotAFragment);
        }
        let (offset, total_adu_len) = probe.primary.fragment.expect("checked above");

        let key = (probe.primary.source, probe.primary.creation_timestamp);
        let full = BundleView::load_fragment(data)?;
        let payload_len = full.payload_size().ok_or(Error::MissingPayload)?;

        let entry = self.entries.entry(key.clone()).or_insert_with(|| FragmentEntry {
            total_adu_len,
            coverage: FragmentSet::new(),
            fragments: Vec::new(),
        });
        entry.coverage.insert(offset..offset + payload_len);
        entry.fragments.push(full);

        if entry.coverage.contains_entirely(0..entry.total_adu_len) {
            let entry = self.entries.remove(&key).expect("just inserted");
            return assemble(&entry.fragments).map(Some);
        }
        Ok(None)
    }

    /// The number of fragment runs currently in progress.
    pub fn pending_count(&self) -> usize {
        self.entries.len()
    }
}

/// A [`FragmentManager`] behind a mutex, for nodes that feed fragments in
/// from more than one receiving task.
#[derive(Default)]
pub struct SharedFragmentManager {
    inner: Mutex<FragmentManager>,
}

impl SharedFragmentManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_fragment(&self, data: &[u8]) -> Result<Option<BundleView>, Error> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .add_fragment(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Cteb;
    use crate::block_flags::BlockFlags;
    use crate::primary_block::PrimaryBlock;

    fn sample_primary() -> PrimaryBlock {
        PrimaryBlock::new(Eid::new(3, 4), Eid::new(1, 2), Eid::NULL, Eid::new(1, 2), 2000)
    }

    fn build_bundle(payload: &'static [u8]) -> BundleView {
        let mut view = BundleView::new(sample_primary());
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(
            payload,
        ))));
        view.render(4096).unwrap();
        view
    }

    #[test]
    fn fragment_set_coalesces_adjacent_ranges() {
        let mut set = FragmentSet::new();
        set.insert(0..10);
        set.insert(10..20);
        assert!(set.contains_entirely(0..20));
    }

    #[test]
    fn fragment_set_reports_gaps() {
        let mut set = FragmentSet::new();
        set.insert(0..10);
        set.insert(15..20);
        assert!(!set.contains_entirely(0..20));
    }

    #[test]
    fn rejects_fragment_size_not_smaller_than_payload() {
        let bundle = build_bundle(b"helloworld");
        assert!(matches!(
            fragment(&bundle, 10),
            Err(Error::InvalidFragmentSize(10, 10))
        ));
    }

    #[test]
    fn rejects_do_not_fragment() {
        let mut bundle = build_bundle(b"helloworld");
        bundle.primary.flags.do_not_fragment = true;
        assert!(matches!(fragment(&bundle, 4), Err(Error::DoNotFragment)));
    }

    #[test]
    fn fragment_then_assemble_roundtrips_payload() {
        let bundle = build_bundle(b"the quick brown fox jumps");
        let fragments = fragment(&bundle, 7).unwrap();
        assert_eq!(fragments.len(), 4);
        for f in &fragments {
            assert!(f.primary.is_fragment());
        }

        let assembled = assemble(&fragments).unwrap();
        assert!(!assembled.primary.is_fragment());
        assert_eq!(assembled.payload_size(), Some(25));
        match &assembled.payload().unwrap().content {
            CanonicalBlock::Payload(b) => assert_eq!(&b[..], b"the quick brown fox jumps"),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn must_replicate_block_appears_in_every_fragment() {
        let mut bundle = BundleView::new(sample_primary());
        let mut cteb_block = Block::new(CanonicalBlock::Cteb(Cteb::new(1, Eid::new(1, 2))));
        cteb_block.flags = BlockFlags {
            must_replicate_in_every_fragment: true,
            ..Default::default()
        };
        bundle.append_canonical(cteb_block);
        bundle.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(
            b"0123456789",
        ))));
        bundle.render(4096).unwrap();

        let fragments = fragment(&bundle, 4).unwrap();
        assert_eq!(fragments.len(), 3);
        for f in &fragments {
            assert_eq!(f.get_blocks_by_type(Type::CustodyTransferEnhancement).len(), 1);
        }
    }

    #[test]
    fn fragment_manager_assembles_once_coverage_is_complete() {
        let bundle = build_bundle(b"0123456789abcdef");
        let fragments = fragment(&bundle, 5).unwrap();

        let mut mgr = FragmentManager::new();
        let mut assembled = None;
        for f in &fragments {
            let bytes = f.rendered_bytes().to_vec();
            if let Some(result) = mgr.add_fragment(&bytes).unwrap() {
                assembled = Some(result);
            }
        }
        let assembled = assembled.expect("should complete after last fragment");
        assert_eq!(assembled.payload_size(), Some(16));
        assert_eq!(mgr.pending_count(), 0);
    }

    #[test]
    fn fragment_manager_rejects_non_fragment_input() {
        let bundle = build_bundle(b"hello");
        let bytes = bundle.rendered_bytes().to_vec();
        let mut mgr = FragmentManager::new();
        assert!(matches!(mgr.add_fragment(&bytes), Err(Error::NotAFragment)));
    }
}
