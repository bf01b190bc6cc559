pub mod coder;
pub mod pipeline;
pub mod stage0_segment;
pub mod stage0_summary;
pub mod stage1_incidents;
pub mod stage2_categories;
pub mod stage2_quotes;
pub mod stage3_memos;
pub mod stage4_synthesis;
pub mod stage5_integrate;
#[cfg(test)]
pub(crate) mod testing;

pub use coder::*;
pub use pipeline::*;
pub use stage0_segment::*;
pub use stage0_summary::*;
pub use stage1_incidents::*;
pub use stage2_categories::*;
pub use stage2_quotes::*;
pub use stage3_memos::*;
pub use stage4_synthesis::*;
pub use stage5_integrate::*;
