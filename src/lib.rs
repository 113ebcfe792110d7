pub mod communications;
pub mod configs;
pub mod knobs;
pub mod lattice;
pub mod ring_buffer;
pub mod straight;
pub mod strength;

mod util;
