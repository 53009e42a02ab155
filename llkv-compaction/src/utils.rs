//! Sizing heuristics and column-group planning.

/// Rows per output segment so that a segment stays under
/// `max_segment_file_size`, estimated from the average on-disk row size of
/// the inputs.
///
/// The result is clamped to `1..=i32::MAX`.
pub fn get_segment_max_rows(
    max_segment_file_size: u64,
    input_row_num: u64,
    input_size: u64,
) -> u32 {
    let avg_row_size = input_size / (input_row_num + 1) + 1;
    let max_rows = max_segment_file_size / avg_row_size;
    if max_rows == 0 || max_rows > i32::MAX as u64 {
        i32::MAX as u32
    } else {
        max_rows as u32
    }
}

/// Rows per chunk for one column-group pass.
///
/// Every merge source holds up to one chunk in memory, so the memory limit is
/// divided across `source_num` chunks of `total_mem_footprint / total_num_rows`
/// bytes per row. A `memory_limit` of `0` disables the bound. With no rows or
/// no sources the configured chunk size is used. The result is always in
/// `1..=config_chunk_size`.
pub fn get_read_chunk_size(
    memory_limit: u64,
    config_chunk_size: usize,
    total_num_rows: u64,
    total_mem_footprint: u64,
    source_num: usize,
) -> usize {
    let config_chunk_size = config_chunk_size.max(1);
    if memory_limit == 0 || total_num_rows == 0 || source_num == 0 {
        return config_chunk_size;
    }
    let avg_row_size = (total_mem_footprint + 1) / (total_num_rows + 1);
    let per_row_all_sources = (source_num as u64).saturating_mul(avg_row_size);
    let chunk_size = 1 + memory_limit / per_row_all_sources.saturating_add(1);
    chunk_size.min(config_chunk_size as u64) as usize
}

/// Partition `0..num_columns` into column groups.
///
/// Group 0 is `key_columns` in the given order; every other column follows in
/// schema order, at most `max_columns_per_group` per group.
pub fn split_column_into_groups(
    num_columns: usize,
    key_columns: &[usize],
    max_columns_per_group: usize,
) -> Vec<Vec<usize>> {
    let max_columns_per_group = max_columns_per_group.max(1);
    let mut groups = vec![key_columns.to_vec()];
    let value_columns: Vec<usize> = (0..num_columns)
        .filter(|c| !key_columns.contains(c))
        .collect();
    groups.extend(
        value_columns
            .chunks(max_columns_per_group)
            .map(<[usize]>::to_vec),
    );
    groups
}
