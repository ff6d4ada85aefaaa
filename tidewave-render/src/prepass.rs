//! Synchronous prepass fallback
//!
//! For runtimes without any streaming primitive. Doubles the render work:
//! a dry pass triggers and awaits every data dependency, the collected
//! query state is dehydrated, and a second synchronous pass then renders
//! with everything resolved, so no placeholder markup reaches the output.

use tidewave_core::hydration::HydrationContext;
use tidewave_core::renderer::{ComponentTree, RendererSuite};
use tidewave_core::{Error, Result};

pub async fn render_with_prepass(
    suite: &RendererSuite,
    tree: &ComponentTree,
    hydration: &HydrationContext,
) -> Result<String> {
    let prepass = suite
        .prepass
        .as_ref()
        .ok_or_else(|| Error::Render("no prepass renderer available".to_string()))?;
    let blocking = suite
        .blocking
        .as_ref()
        .ok_or_else(|| Error::Render("no blocking renderer available".to_string()))?;

    prepass.run(tree).await?;

    // Freeze the accumulated query cache so the second pass renders fully
    // resolved and the client rehydrates from the same snapshot.
    hydration.dehydrate();

    blocking.render_to_string(tree)
}
