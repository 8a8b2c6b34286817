use super::fragments::FragmentIndex;
use super::metadata::ResourceInfo;
use super::range::ByteRange;

/// Default upper bound for a single local read (512 KB)
pub const DEFAULT_PACKAGE_SIZE: u64 = 512 * 1024;

/// One step needed to serve part of a requested range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheAction {
    /// Serve from the local cache file
    Local(ByteRange),
    /// Fetch from the remote source
    Remote(ByteRange),
}

impl CacheAction {
    pub fn range(&self) -> ByteRange {
        match self {
            Self::Local(range) | Self::Remote(range) => *range,
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Remote(_))
    }
}

/// Compute the ordered local/remote steps that exactly cover `requested`.
///
/// Local pieces are split into chunks of at most `package_size` bytes. A `package_size`
/// of zero disables chunking. An empty plan means there is nothing to do: either the
/// request is empty or it starts at or past the known end of the resource.
///
/// `requested.offset + requested.length` must not exceed `u64::MAX`; such a range has no
/// addressable end and cannot be covered exactly.
pub fn plan_actions(
    requested: ByteRange,
    fragments: &FragmentIndex,
    info: Option<&ResourceInfo>,
    package_size: u64,
) -> Vec<CacheAction> {
    debug_assert!(
        requested.is_addressable(),
        "requested range {:?} overflows u64",
        requested
    );
    if requested.is_empty() {
        return Vec::new();
    }

    let package_size = if package_size == 0 {
        u64::MAX
    } else {
        package_size
    };

    let local_actions: Vec<ByteRange> = fragments
        .intersect(&requested)
        .into_iter()
        .flat_map(|piece| split_into_packages(piece, package_size))
        .collect();

    if local_actions.is_empty() {
        if let Some(info) = info
            && requested.offset >= info.content_length
        {
            return Vec::new();
        }
        return vec![CacheAction::Remote(requested)];
    }

    let mut actions = Vec::with_capacity(local_actions.len() * 2 + 1);
    let mut cursor = requested.offset;

    for local in local_actions {
        if cursor < local.offset {
            actions.push(CacheAction::Remote(ByteRange::from_bounds(cursor, local.offset)));
        }
        actions.push(CacheAction::Local(local));
        cursor = local.end();
    }

    if cursor < requested.end() {
        actions.push(CacheAction::Remote(ByteRange::from_bounds(
            cursor,
            requested.end(),
        )));
    }

    actions
}

fn split_into_packages(piece: ByteRange, package_size: u64) -> impl Iterator<Item = ByteRange> {
    let end = piece.end();
    let mut offset = piece.offset;
    std::iter::from_fn(move || {
        if offset >= end {
            return None;
        }
        let length = package_size.min(end - offset);
        let chunk = ByteRange::new(offset, length);
        offset += length;
        Some(chunk)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(ranges: &[(u64, u64)]) -> FragmentIndex {
        let mut index = FragmentIndex::new();
        for &(start, end) in ranges {
            index.add(ByteRange::from_bounds(start, end));
        }
        index
    }

    fn local(start: u64, end: u64) -> CacheAction {
        CacheAction::Local(ByteRange::from_bounds(start, end))
    }

    fn remote(start: u64, end: u64) -> CacheAction {
        CacheAction::Remote(ByteRange::from_bounds(start, end))
    }

    /// Plan must tile the request exactly and respect the package size
    fn assert_exact_cover(actions: &[CacheAction], requested: ByteRange, package_size: u64) {
        let mut cursor = requested.offset;
        for action in actions {
            let range = action.range();
            assert!(!range.is_empty(), "empty action {:?}", action);
            assert_eq!(range.offset, cursor, "gap or overlap at {:?}", action);
            if action.is_local() {
                assert!(range.length <= package_size, "oversized {:?}", action);
            }
            cursor = range.end();
        }
        assert_eq!(cursor, requested.end());
    }

    #[test]
    fn test_trailing_gap_becomes_remote() {
        let actions = plan_actions(
            ByteRange::from_bounds(50, 200),
            &index(&[(0, 100)]),
            None,
            60,
        );
        assert_eq!(actions, vec![local(50, 100), remote(100, 200)]);
    }

    #[test]
    fn test_empty_index_is_single_remote() {
        let actions = plan_actions(ByteRange::from_bounds(0, 500), &index(&[]), None, 60);
        assert_eq!(actions, vec![remote(0, 500)]);
    }

    #[test]
    fn test_past_end_of_resource_is_empty() {
        let info = ResourceInfo::new(1000, "video/mp4");
        let actions = plan_actions(
            ByteRange::from_bounds(1200, 1300),
            &index(&[]),
            Some(&info),
            60,
        );
        assert!(actions.is_empty());
    }

    #[test]
    fn test_empty_request_is_empty_plan() {
        let actions = plan_actions(ByteRange::new(10, 0), &index(&[(0, 100)]), None, 60);
        assert!(actions.is_empty());
    }

    #[test]
    fn test_local_pieces_are_chunked() {
        let actions = plan_actions(
            ByteRange::from_bounds(0, 250),
            &index(&[(0, 250)]),
            None,
            100,
        );
        assert_eq!(actions, vec![local(0, 100), local(100, 200), local(200, 250)]);
    }

    #[test]
    fn test_gaps_filled_between_and_around_fragments() {
        let actions = plan_actions(
            ByteRange::from_bounds(0, 1000),
            &index(&[(100, 200), (400, 500)]),
            None,
            1024,
        );
        assert_eq!(
            actions,
            vec![
                remote(0, 100),
                local(100, 200),
                remote(200, 400),
                local(400, 500),
                remote(500, 1000),
            ]
        );
    }

    #[test]
    fn test_zero_package_size_disables_chunking() {
        let actions = plan_actions(
            ByteRange::from_bounds(0, 10_000),
            &index(&[(0, 10_000)]),
            None,
            0,
        );
        assert_eq!(actions, vec![local(0, 10_000)]);
    }

    #[test]
    fn test_exact_cover_over_many_layouts() {
        let layouts: &[&[(u64, u64)]] = &[
            &[],
            &[(0, 1)],
            &[(0, 100), (150, 300), (301, 302), (800, 4096)],
            &[(10, 20), (30, 40), (50, 60), (70, 80)],
            &[(0, 10_000)],
        ];
        let requests = [
            ByteRange::from_bounds(0, 10_000),
            ByteRange::from_bounds(5, 95),
            ByteRange::from_bounds(99, 801),
            ByteRange::from_bounds(301, 302),
            ByteRange::from_bounds(4000, 9000),
        ];

        for layout in layouts {
            let fragments = index(layout);
            for &requested in &requests {
                for package_size in [1, 7, 64, 1 << 20] {
                    let actions = plan_actions(requested, &fragments, None, package_size);
                    assert_exact_cover(&actions, requested, package_size);
                }
            }
        }
    }

    #[test]
    fn test_request_ending_at_address_limit() {
        let fragments = index(&[(u64::MAX - 100, u64::MAX - 50)]);
        let requested = ByteRange::from_bounds(u64::MAX - 200, u64::MAX);

        let actions = plan_actions(requested, &fragments, None, 0);
        assert_eq!(
            actions,
            vec![
                remote(u64::MAX - 200, u64::MAX - 100),
                local(u64::MAX - 100, u64::MAX - 50),
                remote(u64::MAX - 50, u64::MAX),
            ]
        );
        assert_exact_cover(&actions, requested, u64::MAX);
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "overflows u64")]
    fn test_overflowing_request_is_rejected() {
        let fragments = index(&[(u64::MAX - 100, u64::MAX - 50)]);
        plan_actions(ByteRange::new(u64::MAX - 200, 400), &fragments, None, 0);
    }
}
