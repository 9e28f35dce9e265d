use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

/// Record layout of the header page (page 0).
///
/// `[record_count: u32]` followed by fixed-width records of
/// `[name: 32 bytes, zero padded][root_page_id: i32]`, mapping each
/// index name to its current root page id.
const COUNT_SIZE: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - COUNT_SIZE) / RECORD_SIZE;

fn record_count(page: &Page) -> usize {
    LittleEndian::read_u32(&page.data[0..COUNT_SIZE]) as usize
}

fn set_record_count(page: &mut Page, count: usize) {
    LittleEndian::write_u32(&mut page.data[0..COUNT_SIZE], count as u32);
}

fn record_offset(index: usize) -> usize {
    COUNT_SIZE + index * RECORD_SIZE
}

fn name_at(page: &Page, index: usize) -> &[u8] {
    let offset = record_offset(index);
    let name = &page.data[offset..offset + NAME_SIZE];
    let len = name.iter().position(|&b| b == 0).unwrap_or(NAME_SIZE);
    &name[..len]
}

fn find_record(page: &Page, name: &str) -> Option<usize> {
    (0..record_count(page)).find(|&i| name_at(page, i) == name.as_bytes())
}

/// Append a `(name, root_page_id)` record. Fails when the name is
/// already present, over-long, or the page is full.
pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    let count = record_count(page);
    if name.len() > NAME_SIZE || count >= MAX_RECORDS || find_record(page, name).is_some() {
        return false;
    }

    let offset = record_offset(count);
    page.data[offset..offset + NAME_SIZE].fill(0);
    page.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
    LittleEndian::write_i32(
        &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
        root_page_id,
    );
    set_record_count(page, count + 1);
    true
}

/// Point an existing record at a new root page id.
pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
    let Some(index) = find_record(page, name) else {
        return false;
    };
    let offset = record_offset(index);
    LittleEndian::write_i32(
        &mut page.data[offset + NAME_SIZE..offset + RECORD_SIZE],
        root_page_id,
    );
    true
}

/// Root page id recorded for `name`, if any.
pub fn get_root_page_id(page: &Page, name: &str) -> Option<PageId> {
    find_record(page, name).map(|index| {
        let offset = record_offset(index);
        LittleEndian::read_i32(&page.data[offset + NAME_SIZE..offset + RECORD_SIZE])
    })
}
