//! Higher-order transformers that run branch pipelines over a channel.
//!
//! | Stage | Branches | Fed back |
//! |---|---|---|
//! | [`Fork`] | 1, concurrent | no |
//! | [`ForkMerge`] | N, concurrent | yes, interleaved |
//! | [`SplitIn`] | 1 per key group, sequential | yes, concatenated |
//!
//! Branches always see the normalized form of the main stream.

mod merge;
mod side;
mod split;

pub use merge::ForkMerge;
pub use side::Fork;
pub use split::SplitIn;

use std::sync::Arc;

use futures_util::StreamExt;
use rowflow_types::TableHeader;

use crate::channel::RowChannel;
use crate::context::Context;
use crate::source::Source;

/// Source reading a branch's input channel.
fn branch_input(header: Arc<TableHeader>, context: Context, channel: &RowChannel) -> Source {
    Source::new(header, context, channel.clone().into_stream().map(Ok).boxed())
}

/// Close a branch input and discard whatever is still buffered, so a
/// producer flushing it is not left waiting.
async fn abandon(channel: &RowChannel) {
    channel.close();
    while channel.take().await.is_some() {}
}
