//! Custom tracing layers
//!
//! [`HostContextLayer`] stamps every new span with the host context that was
//! active when the span was opened, so later layers and formatters can tell
//! which router emitted an event.

use tracing::{Subscriber, span};
use tracing_subscriber::{
    Layer,
    fmt::MakeWriter,
    layer::Context,
    registry::LookupSpan,
};

use crate::config::JsonlConfig;
use crate::context::{HostContextData, HostContextGuard};

/// Layer that injects host context into spans
#[derive(Debug, Default, Clone, Copy)]
pub struct HostContextLayer;

impl HostContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct HostContextExtension {
    pub data: HostContextData,
}

impl<S> Layer<S> for HostContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let (Some(span), Some(data)) = (ctx.span(id), HostContextGuard::current()) else {
            return;
        };
        span.extensions_mut().insert(HostContextExtension { data });
    }
}

/// JSONL formatting layer writing to `writer`
pub fn jsonl_layer<S, W>(config: &JsonlConfig, writer: W) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup> + 'static,
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(config.include_spans)
        .flatten_event(config.flatten_events)
        .with_file(config.include_location)
        .with_line_number(config.include_location)
        .with_writer(writer)
        .boxed()
}
