//! Dynamic template helpers bound to pool pops.
//!
//! Each helper is a zero-argument call that pops from its consumable ring or
//! samples a reusable corpus. A failed pop writes the kind's fallback value;
//! a render never fails because a pool ran dry.

use handlebars::{
    Context, Handlebars, Helper, HelperDef, HelperResult, Output, RenderContext,
};
use pagemill_pool::{ConsumablePool, ConsumablePools, ReusablePools};
use std::sync::Arc;

/// Context keys the sampling helpers read their group ids from.
pub const KEYWORD_GROUP_KEY: &str = "keyword_group_id";
pub const IMAGE_GROUP_KEY: &str = "image_group_id";

/// Pops one item from a consumable ring.
struct PopHelper {
    pool: Arc<ConsumablePool>,
    fallback: &'static str,
    escape: bool,
}

impl HelperDef for PopHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        _h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        _ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let item = self.pool.try_pop();
        let value = item.as_deref().unwrap_or(self.fallback);
        if self.escape {
            out.write(&handlebars::html_escape(value))?;
        } else {
            out.write(value)?;
        }
        Ok(())
    }
}

/// Samples one item from a reusable corpus; the group id comes from the
/// render data so one registered helper serves every site.
struct SampleHelper {
    pools: Arc<ReusablePools>,
    kind: pagemill_types::ReusableKind,
    group_key: &'static str,
}

impl HelperDef for SampleHelper {
    fn call<'reg: 'rc, 'rc>(
        &self,
        _h: &Helper<'rc>,
        _r: &'reg Handlebars<'reg>,
        ctx: &'rc Context,
        _rc: &mut RenderContext<'reg, 'rc>,
        out: &mut dyn Output,
    ) -> HelperResult {
        let group_id = ctx
            .data()
            .get(self.group_key)
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        let sampled = self
            .pools
            .corpus(self.kind)
            .get_random_escaped(group_id, 1)
            .pop()
            .unwrap_or_default();
        out.write(&sampled)?;
        Ok(())
    }
}

/// Register the six pool-bound helpers on a long-lived registry.
pub fn register_pool_helpers(
    registry: &mut Handlebars<'static>,
    consumables: &Arc<ConsumablePools>,
    reusables: &Arc<ReusablePools>,
) {
    registry.register_helper(
        "cls",
        Box::new(PopHelper {
            pool: consumables.cls.clone(),
            fallback: "a0",
            escape: false,
        }),
    );
    registry.register_helper(
        "random_url",
        Box::new(PopHelper {
            pool: consumables.url.clone(),
            fallback: "/",
            escape: false,
        }),
    );
    registry.register_helper(
        "keyword_with_emoji",
        Box::new(PopHelper {
            pool: consumables.keyword_emoji.clone(),
            fallback: "",
            escape: true,
        }),
    );
    // Content is pre-written HTML; it is emitted verbatim and its
    // exhaustion fallback is the empty sentinel.
    registry.register_helper(
        "random_content",
        Box::new(PopHelper {
            pool: consumables.content.clone(),
            fallback: "",
            escape: false,
        }),
    );
    registry.register_helper(
        "random_keyword",
        Box::new(SampleHelper {
            pools: reusables.clone(),
            kind: pagemill_types::ReusableKind::Keyword,
            group_key: KEYWORD_GROUP_KEY,
        }),
    );
    registry.register_helper(
        "random_image",
        Box::new(SampleHelper {
            pools: reusables.clone(),
            kind: pagemill_types::ReusableKind::Image,
            group_key: IMAGE_GROUP_KEY,
        }),
    );
}
