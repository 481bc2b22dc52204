//! The bundle view: owns one bundle's rendered bytes plus an ordered list of
//! block views, each tracking whether its wire bytes are stale.
//!
//! Mutations set a dirty bit rather than reserializing immediately, so
//! `render()` can reuse untouched bytes with a memmove instead of a full
//! re-encode; the common case of flipping one processing flag patches a
//! single byte in place and touches no dirty bit at all.

use crate::block::{AdminRecord, Block, CanonicalBlock, Type};
use crate::block_flags::BlockFlags;
use crate::eid::Eid;
use crate::error::Error;
use crate::primary_block::PrimaryBlock;
use crate::sdnv;
use std::collections::HashMap;
use std::ops::Range;

#[derive(Debug, Clone)]
pub(crate) struct BlockView {
    block: Block,
    dirty: bool,
    marked_for_deletion: bool,
    rendered_range: Option<Range<usize>>,
    cached_size: u64,
}

impl BlockView {
    fn fresh(block: Block) -> Self {
        let cached_size = block.serialized_size();
        Self {
            block,
            dirty: true,
            marked_for_deletion: false,
            rendered_range: None,
            cached_size,
        }
    }

    fn serialized_size(&self) -> u64 {
        if self.dirty {
            self.block.serialized_size()
        } else {
            self.cached_size
        }
    }
}

#[derive(Debug, Clone)]
pub struct BundleView {
    pub primary: PrimaryBlock,
    primary_dirty: bool,
    primary_rendered_range: Option<Range<usize>>,
    primary_cached_len: u64,
    blocks: Vec<BlockView>,
    front_buffer: Vec<u8>,
    back_buffer: Vec<u8>,
    /// Typed blocks moved aside on deletion or reset, one slot per block
    /// type, reused by the next parse of a matching type instead of
    /// allocating fresh.
    recycle: HashMap<Type, CanonicalBlock>,
}

impl BundleView {
    pub fn new(primary: PrimaryBlock) -> Self {
        Self {
            primary,
            primary_dirty: true,
            primary_rendered_range: None,
            primary_cached_len: 0,
            blocks: Vec::new(),
            front_buffer: Vec::new(),
            back_buffer: Vec::new(),
            recycle: HashMap::new(),
        }
    }

    /// Parses a complete bundle from `data`. Rejects bundles whose primary
    /// carries `ISFRAGMENT`; those must go through
    /// [`crate::fragment::FragmentManager`] instead.
    pub fn load(data: &[u8]) -> Result<Self, Error> {
        let view = Self::load_internal(data)?;
        if view.primary.is_fragment() {
            return Err(Error::FragmentRequiresReassembly);
        }
        Ok(view)
    }

    /// Parses only the primary block, for callers (the fragment manager)
    /// that need to key on identity fields before deciding how to handle
    /// the rest of the bundle.
    pub fn load_primary_only(data: &[u8]) -> Result<Self, Error> {
        let (primary, len) = PrimaryBlock::decode(data)?;
        let mut view = Self::new(primary);
        view.front_buffer = data[..len].to_vec();
        view.primary_rendered_range = Some(0..len);
        view.primary_dirty = false;
        view.primary_cached_len = len as u64;
        Ok(view)
    }

    /// Parses a complete bundle without rejecting fragments, for the
    /// fragment manager's internal use.
    pub(crate) fn load_fragment(data: &[u8]) -> Result<Self, Error> {
        Self::load_internal(data)
    }

    fn load_internal(data: &[u8]) -> Result<Self, Error> {
        let (primary, pos) = PrimaryBlock::decode(data)?;
        let mut view = Self::new(primary);
        view.primary_rendered_range = Some(0..pos);
        view.primary_dirty = false;
        view.primary_cached_len = pos as u64;

        view.blocks = Self::parse_blocks(data, pos, &mut view.recycle)?;
        Self::check_block_invariants(&view.blocks)?;

        view.front_buffer = data.to_vec();
        Ok(view)
    }

    /// Re-parses `self` from `data` in place: the view's current blocks are
    /// reset into the per-type recycle slots (matching a block delete in
    /// [`Self::render`]), then each freshly parsed block pulls a same-type
    /// recycled value if one is available, avoiding a fresh heap allocation
    /// for block kinds whose decode can reuse one (currently
    /// [`crate::block::Metadata`]'s inner buffer).
    ///
    /// Rejects a fragment primary exactly like [`Self::load`]. The view's
    /// old blocks are moved into the recycle slots unconditionally, before
    /// the new data is parsed - that move is the "view is reset" half of
    /// the recycling contract and happens whether or not the new parse
    /// goes on to succeed. `self.primary` and `self.blocks` otherwise only
    /// change once parsing and validation of the new data succeed.
    pub fn reload(&mut self, data: &[u8]) -> Result<(), Error> {
        for old in self.blocks.drain(..) {
            self.recycle.insert(old.block.block_type(), old.block.content);
        }

        let (primary, pos) = PrimaryBlock::decode(data)?;
        let blocks = Self::parse_blocks(data, pos, &mut self.recycle)?;
        Self::check_block_invariants(&blocks)?;

        if primary.is_fragment() {
            return Err(Error::FragmentRequiresReassembly);
        }

        self.primary = primary;
        self.primary_rendered_range = Some(0..pos);
        self.primary_dirty = false;
        self.primary_cached_len = pos as u64;
        self.blocks = blocks;
        self.front_buffer = data.to_vec();
        Ok(())
    }

    /// Parses the canonical block run starting at `pos`, recycling a
    /// same-type entry out of `recycle` for each block when one is present.
    fn parse_blocks(
        data: &[u8],
        mut pos: usize,
        recycle: &mut HashMap<Type, CanonicalBlock>,
    ) -> Result<Vec<BlockView>, Error> {
        let mut blocks = Vec::new();
        let mut saw_last = false;
        while pos < data.len() {
            let block_type = Type::from(data[pos]);
            let recycled = recycle.remove(&block_type);
            let (block, len) = Block::deserialize_recycled(&data[pos..], recycled)?;
            let is_last = block.flags.is_last_block;
            let range = pos..pos + len;
            pos += len;

            let mut bv = BlockView::fresh(block);
            bv.dirty = false;
            bv.rendered_range = Some(range);
            bv.cached_size = bv.block.serialized_size();
            blocks.push(bv);

            if is_last {
                saw_last = true;
                break;
            }
        }
        if !saw_last {
            return Err(Error::MissingLastBlock);
        }
        if pos != data.len() {
            return Err(Error::TrailingData(data.len() - pos));
        }
        Ok(blocks)
    }

    fn check_block_invariants(blocks: &[BlockView]) -> Result<(), Error> {
        if blocks
            .iter()
            .filter(|b| b.block.block_type() == Type::Payload)
            .count()
            > 1
        {
            return Err(Error::DuplicatePayload);
        }
        if blocks
            .iter()
            .filter(|b| b.block.block_type() == Type::CustodyTransferEnhancement)
            .count()
            > 1
        {
            return Err(Error::DuplicateCteb);
        }
        Ok(())
    }

    /// Marks the primary block dirty after a caller has mutated `primary`
    /// directly (e.g. custodian rewriting), so the next `render()`
    /// re-encodes it instead of reusing stale rendered bytes.
    pub fn touch_primary(&mut self) {
        self.primary_dirty = true;
    }

    pub fn append_canonical(&mut self, block: Block) {
        self.blocks.push(BlockView::fresh(block));
    }

    pub fn prepend_canonical(&mut self, block: Block) {
        self.blocks.insert(0, BlockView::fresh(block));
    }

    pub fn get_blocks_by_type(&self, t: Type) -> Vec<&Block> {
        self.blocks
            .iter()
            .filter(|b| !b.marked_for_deletion && b.block.block_type() == t)
            .map(|b| &b.block)
            .collect()
    }

    pub fn delete_all_by_type(&mut self, t: Type) -> usize {
        let mut count = 0;
        for b in self.blocks.iter_mut() {
            if !b.marked_for_deletion && b.block.block_type() == t {
                b.marked_for_deletion = true;
                count += 1;
            }
        }
        count
    }

    pub fn payload(&self) -> Option<&Block> {
        self.blocks
            .iter()
            .find(|b| !b.marked_for_deletion && b.block.block_type() == Type::Payload)
            .map(|b| &b.block)
    }

    pub fn payload_size(&self) -> Option<u64> {
        self.payload().map(|b| match &b.content {
            CanonicalBlock::Payload(bytes) => bytes.len() as u64,
            other => other.serialized_size(),
        })
    }

    /// Interprets the payload block's bytes as an administrative record, if
    /// the primary's `ADMINRECORD` flag is set.
    pub fn admin_record(&self) -> Result<Option<AdminRecord>, Error> {
        if !self.primary.flags.is_admin_record {
            return Ok(None);
        }
        let Some(payload) = self.payload() else {
            return Ok(None);
        };
        let CanonicalBlock::Payload(bytes) = &payload.content else {
            return Ok(None);
        };
        Ok(Some(AdminRecord::deserialize(
            self.primary.is_fragment(),
            bytes,
        )?))
    }

    /// Finds the single CTEB present, if any. Returns `Err` if more than one
    /// is present (callers should already have rejected this at load time
    /// for ingress bundles; this guards bundles built up in memory too).
    pub fn cteb(&self) -> Result<Option<&crate::block::Cteb>, Error> {
        let mut found = None;
        for b in &self.blocks {
            if b.marked_for_deletion {
                continue;
            }
            if let CanonicalBlock::Cteb(cteb) = &b.block.content {
                if found.is_some() {
                    return Err(Error::DuplicateCteb);
                }
                found = Some(cteb);
            }
        }
        Ok(found)
    }

    /// Sets or clears a processing-control flag on the block at `index`,
    /// patching the rendered byte in place when the flag's SDNV stays a
    /// single byte both before and after the change.
    pub fn set_block_flag(
        &mut self,
        index: usize,
        mutate: impl FnOnce(&mut BlockFlags),
    ) -> Result<(), Error> {
        let view = self
            .blocks
            .get_mut(index)
            .ok_or(Error::BlockTruncated)?;

        let old_len = sdnv::encoded_len(u64::from(&view.block.flags));
        mutate(&mut view.block.flags);
        let new_len = sdnv::encoded_len(u64::from(&view.block.flags));

        if !view.dirty && old_len == 1 && new_len == 1 {
            if let Some(range) = view.rendered_range.clone() {
                self.front_buffer[range.start + 1] = u64::from(&view.block.flags) as u8;
                return Ok(());
            }
        }
        view.dirty = true;
        Ok(())
    }

    pub fn serialized_size(&self) -> u64 {
        let primary_len = if self.primary_dirty {
            self.primary.encoded_len()
        } else {
            self.primary_cached_len
        };
        primary_len
            + self
                .blocks
                .iter()
                .filter(|b| !b.marked_for_deletion)
                .map(|b| b.serialized_size())
                .sum::<u64>()
    }

    /// Re-renders the bundle into a buffer of at most `max_bytes`, reusing
    /// unchanged bytes via memmove and reserializing only dirty blocks.
    ///
    /// Works on fragment primaries too: the fragmenter builds each fragment
    /// as an ordinary `BundleView` and renders it through this same path.
    /// Only [`Self::load`] rejects a fragment primary, since a fragment's
    /// bytes must go through [`crate::fragment::FragmentManager`] instead of
    /// being treated as a standalone bundle.
    pub fn render(&mut self, max_bytes: usize) -> Result<(), Error> {
        let mut i = 0;
        while i < self.blocks.len() {
            if self.blocks[i].marked_for_deletion {
                let deleted = self.blocks.remove(i);
                self.recycle.insert(deleted.block.block_type(), deleted.block.content);
            } else {
                i += 1;
            }
        }

        let mut back = std::mem::take(&mut self.back_buffer);
        back.clear();

        if !self.primary_dirty {
            if let Some(range) = self.primary_rendered_range.clone() {
                back.extend_from_slice(&self.front_buffer[range]);
            } else {
                self.primary.encode(&mut back);
            }
        } else {
            self.primary.encode(&mut back);
        }
        self.primary_rendered_range = Some(0..back.len());
        self.primary_cached_len = back.len() as u64;
        self.primary_dirty = false;

        let last_index = self.blocks.len().checked_sub(1);

        for (i, view) in self.blocks.iter_mut().enumerate() {
            let desired_last = last_index == Some(i);
            if view.block.flags.is_last_block != desired_last {
                let old_len = sdnv::encoded_len(u64::from(&view.block.flags));
                view.block.flags.set_is_last_block(desired_last);
                let new_len = sdnv::encoded_len(u64::from(&view.block.flags));
                if view.dirty || old_len != 1 || new_len != 1 {
                    view.dirty = true;
                }
            }

            let start = back.len();
            if view.dirty {
                view.block.serialize(&mut back);
            } else if let Some(range) = view.rendered_range.clone() {
                back.extend_from_slice(&self.front_buffer[range]);
                // The last-block flag may have flipped in place even though
                // the block as a whole wasn't dirty; patch it post-copy.
                let flags_byte_offset = start + 1;
                back[flags_byte_offset] = u64::from(&view.block.flags) as u8;
            } else {
                view.block.serialize(&mut back);
            }
            let end = back.len();

            let size = (end - start) as u64;
            if size <= 2 {
                return Err(Error::ImpossibleBlockSize(size));
            }

            view.rendered_range = Some(start..end);
            view.cached_size = size;
            view.dirty = false;
        }

        if back.len() > max_bytes {
            return Err(Error::BufferTooSmall(max_bytes, back.len() as u64));
        }

        self.back_buffer = std::mem::replace(&mut self.front_buffer, back);
        Ok(())
    }

    pub fn rendered_bytes(&self) -> &[u8] {
        &self.front_buffer
    }

    pub(crate) fn blocks_mut(&mut self) -> &mut Vec<BlockView> {
        // Exposed to `custody`/`fragment` modules within this crate only.
        &mut self.blocks
    }

    pub(crate) fn blocks(&self) -> &[BlockView] {
        &self.blocks
    }
}

impl BlockView {
    pub(crate) fn block(&self) -> &Block {
        &self.block
    }

    pub(crate) fn block_mut(&mut self) -> &mut Block {
        self.dirty = true;
        &mut self.block
    }

    pub(crate) fn is_deleted(&self) -> bool {
        self.marked_for_deletion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Cteb;
    use bytes::Bytes;

    fn sample_primary() -> PrimaryBlock {
        PrimaryBlock::new(Eid::new(3, 4), Eid::new(1, 2), Eid::NULL, Eid::new(1, 2), 2000)
    }

    #[test]
    fn load_render_roundtrip_is_stable() {
        let mut view = BundleView::new(sample_primary());
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(
            b"helloworld",
        ))));
        view.render(1024).unwrap();
        let bytes = view.rendered_bytes().to_vec();

        let reloaded = BundleView::load(&bytes).unwrap();
        assert_eq!(reloaded.primary.destination, view.primary.destination);
        assert_eq!(reloaded.payload_size(), Some(10));

        let mut rerendered = reloaded;
        rerendered.render(1024).unwrap();
        assert_eq!(rerendered.rendered_bytes(), bytes.as_slice());
    }

    #[test]
    fn rejects_loading_a_fragment_via_standalone_path() {
        let mut primary = sample_primary();
        primary.flags.is_fragment = true;
        primary.fragment = Some((0, 20));
        let mut view = BundleView::new(primary);
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"hello"))));
        view.render(1024).unwrap();
        let bytes = view.rendered_bytes().to_vec();

        assert!(matches!(
            BundleView::load(&bytes),
            Err(Error::FragmentRequiresReassembly)
        ));
    }

    #[test]
    fn render_sets_exactly_one_last_block() {
        let mut view = BundleView::new(sample_primary());
        view.append_canonical(Block::new(CanonicalBlock::Cteb(Cteb::new(1, Eid::new(1, 2)))));
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"x"))));
        view.render(1024).unwrap();

        let last_flags: Vec<bool> = view.blocks().iter().map(|b| b.block.flags.is_last_block).collect();
        assert_eq!(last_flags, vec![false, true]);
    }

    #[test]
    fn flag_patch_avoids_marking_dirty() {
        let mut view = BundleView::new(sample_primary());
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"hi"))));
        view.render(1024).unwrap();

        view.set_block_flag(0, |f| f.discard_block_if_unprocessed = true).unwrap();
        assert!(!view.blocks()[0].dirty);

        let bytes_before = view.rendered_bytes().to_vec();
        view.render(1024).unwrap();
        assert_eq!(view.rendered_bytes(), bytes_before.as_slice());
    }

    #[test]
    fn delete_all_by_type_removes_on_next_render() {
        let mut view = BundleView::new(sample_primary());
        view.append_canonical(Block::new(CanonicalBlock::Cteb(Cteb::new(1, Eid::new(1, 2)))));
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"x"))));
        view.render(1024).unwrap();

        assert_eq!(view.delete_all_by_type(Type::CustodyTransferEnhancement), 1);
        view.render(1024).unwrap();
        assert!(view.get_blocks_by_type(Type::CustodyTransferEnhancement).is_empty());
    }

    #[test]
    fn deleted_block_is_recycled_into_next_reload() {
        use crate::block::Metadata;
        use crate::block::metadata::MetadataContent;

        let mut view = BundleView::new(sample_primary());
        view.append_canonical(Block::new(CanonicalBlock::Metadata(Metadata::uri_list(vec![
            Eid::new(9, 9),
        ]))));
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"x"))));
        view.render(1024).unwrap();

        assert_eq!(view.delete_all_by_type(Type::MetadataExtension), 1);
        view.render(1024).unwrap();
        assert!(view.recycle.contains_key(&Type::MetadataExtension));

        let mut other = BundleView::new(sample_primary());
        other.append_canonical(Block::new(CanonicalBlock::Metadata(Metadata::uri_list(vec![
            Eid::new(1, 2),
            Eid::new(3, 4),
        ]))));
        other.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"y"))));
        other.render(1024).unwrap();
        let other_bytes = other.rendered_bytes().to_vec();

        view.reload(&other_bytes).unwrap();
        assert!(!view.recycle.contains_key(&Type::MetadataExtension));
        match &view.get_blocks_by_type(Type::MetadataExtension)[0].content {
            CanonicalBlock::Metadata(md) => {
                assert_eq!(
                    md.content,
                    MetadataContent::UriList(vec![Eid::new(1, 2), Eid::new(3, 4)])
                );
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn reload_rejects_fragment_primary() {
        let mut fragment_primary = sample_primary();
        fragment_primary.flags.is_fragment = true;
        fragment_primary.fragment = Some((0, 20));
        let mut fragment_view = BundleView::new(fragment_primary);
        fragment_view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"hello"))));
        fragment_view.render(1024).unwrap();
        let fragment_bytes = fragment_view.rendered_bytes().to_vec();

        let mut view = BundleView::new(sample_primary());
        view.append_canonical(Block::new(CanonicalBlock::Payload(Bytes::from_static(b"x"))));
        view.render(1024).unwrap();

        assert!(matches!(
            view.reload(&fragment_bytes),
            Err(Error::FragmentRequiresReassembly)
        ));
    }
}
