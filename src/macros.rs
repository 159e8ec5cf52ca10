// (c) Copyright 2025 Helsing GmbH. All rights reserved.
/// Convenience macro for creating block positions.
///
/// ```rust
/// # use ticktx::{block_pos, BlockPos};
/// assert_eq!(block_pos!(1, -2, 3), BlockPos::new(1, -2, 3));
/// assert_eq!(block_pos!(), BlockPos::ORIGIN);
/// ```
#[macro_export]
macro_rules! block_pos {
    () => {
        $crate::BlockPos::ORIGIN
    };
    ($x:expr, $y:expr, $z:expr) => {
        $crate::BlockPos::new($x, $y, $z)
    };
}

/// Convenience macro for creating a [`MemoryWorld`](crate::MemoryWorld) with some blocks set.
///
/// NOTE! This is mostly useful for tests. Attached objects, entities and container slots have to
/// be set up separately.
///
/// ```rust
/// # use ticktx::{block_pos, memory_world, World};
/// let world = memory_world! {
///     (0, 0, 0) => "stone",
///     (0, 1, 0) => "torch"
/// };
/// assert_eq!(world.block(block_pos!(0, 1, 0)), "torch");
/// assert_eq!(world.block(block_pos!(0, 2, 0)), "air");
/// ```
#[macro_export]
macro_rules! memory_world {
    ($(($x:expr, $y:expr, $z:expr) => $block:expr),* $(,)?) => {{
        #[allow(unused_mut)]
        let mut world = $crate::MemoryWorld::new();
        $(
            $crate::World::set_block(&mut world, $crate::block_pos!($x, $y, $z), $block);
        )*
        world
    }};
}
