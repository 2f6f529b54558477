use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tracing::debug;

use crate::context::StartContext;

/// Extension points of the start flow, run in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Hook {
    BeforeStart,
    Start,
    AfterStart,
}

impl Hook {
    pub const ALL: [Hook; 3] = [Hook::BeforeStart, Hook::Start, Hook::AfterStart];

    pub fn as_str(self) -> &'static str {
        match self {
            Hook::BeforeStart => "before_start",
            Hook::Start => "start",
            Hook::AfterStart => "after_start",
        }
    }
}

/// A pipeline stage. Subscribers run strictly sequentially against one shared
/// mutable [`StartContext`]; `reads`/`writes` document which context fields a
/// stage touches so ordering dependencies stay auditable.
#[async_trait]
pub trait Subscriber: Send + Sync {
    fn reads(&self) -> &'static [&'static str] {
        &[]
    }

    fn writes(&self) -> &'static [&'static str] {
        &[]
    }

    async fn call(&self, ctx: &mut StartContext) -> Result<()>;
}

struct Registration {
    name: &'static str,
    subscriber: Box<dyn Subscriber>,
}

/// Ordered hooks, each with its subscribers in registration order.
pub struct StartPipeline {
    hooks: Vec<(Hook, Vec<Registration>)>,
}

impl Default for StartPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl StartPipeline {
    pub fn new() -> Self {
        Self {
            hooks: Hook::ALL.map(|hook| (hook, Vec::new())).into(),
        }
    }

    pub fn register(&mut self, hook: Hook, name: &'static str, subscriber: Box<dyn Subscriber>) {
        let slot = self
            .hooks
            .iter_mut()
            .find(|(candidate, _)| *candidate == hook)
            .expect("every hook is pre-registered");
        slot.1.push(Registration { name, subscriber });
    }

    /// Await every subscriber for `hook` in registration order. The first
    /// error aborts the remaining subscribers and propagates to the caller.
    pub async fn run(&self, hook: Hook, ctx: &mut StartContext) -> Result<()> {
        let Some((_, registrations)) = self
            .hooks
            .iter()
            .find(|(candidate, _)| *candidate == hook)
        else {
            return Ok(());
        };

        for registration in registrations {
            debug!(
                hook = hook.as_str(),
                subscriber = registration.name,
                reads = ?registration.subscriber.reads(),
                writes = ?registration.subscriber.writes(),
                "running pipeline stage"
            );
            registration
                .subscriber
                .call(ctx)
                .await
                .with_context(|| {
                    format!(
                        "subscriber `{}` failed on hook `{}`",
                        registration.name,
                        hook.as_str()
                    )
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::appconfig::{AppConfig, WorkspaceConfig};
    use crate::context::StartOpts;
    use anyhow::bail;
    use std::path::PathBuf;

    fn empty_context() -> StartContext {
        StartContext {
            cmd_opts: StartOpts::default(),
            cwd: PathBuf::from("."),
            app: AppConfig {
                cwd: PathBuf::from("."),
                workspace: WorkspaceConfig {
                    name: "test".into(),
                    blocks: Vec::new(),
                    sub_packages: Vec::new(),
                },
            },
            package_name: "test".into(),
            sub_packages: Vec::new(),
            block_groups: Vec::new(),
            middleware_blocks: Vec::new(),
            env_warning: Default::default(),
        }
    }

    /// Appends its tag to the package name so ordering is observable.
    struct Tagger(&'static str);

    #[async_trait]
    impl Subscriber for Tagger {
        fn writes(&self) -> &'static [&'static str] {
            &["package_name"]
        }

        async fn call(&self, ctx: &mut StartContext) -> Result<()> {
            ctx.package_name.push_str(self.0);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Subscriber for Failing {
        async fn call(&self, _ctx: &mut StartContext) -> Result<()> {
            bail!("boom");
        }
    }

    #[tokio::test]
    async fn subscribers_run_in_registration_order() {
        let mut pipeline = StartPipeline::new();
        pipeline.register(Hook::BeforeStart, "a", Box::new(Tagger("-a")));
        pipeline.register(Hook::BeforeStart, "b", Box::new(Tagger("-b")));
        pipeline.register(Hook::Start, "c", Box::new(Tagger("-c")));

        let mut ctx = empty_context();
        pipeline.run(Hook::BeforeStart, &mut ctx).await.unwrap();
        pipeline.run(Hook::Start, &mut ctx).await.unwrap();
        assert_eq!(ctx.package_name, "test-a-b-c");
    }

    #[tokio::test]
    async fn an_error_aborts_the_remaining_subscribers() {
        let mut pipeline = StartPipeline::new();
        pipeline.register(Hook::BeforeStart, "first", Box::new(Tagger("-1")));
        pipeline.register(Hook::BeforeStart, "failing", Box::new(Failing));
        pipeline.register(Hook::BeforeStart, "unreached", Box::new(Tagger("-2")));

        let mut ctx = empty_context();
        let err = pipeline.run(Hook::BeforeStart, &mut ctx).await.unwrap_err();
        assert!(err.to_string().contains("subscriber `failing`"));
        // The failing stage stopped the rest of the hook.
        assert_eq!(ctx.package_name, "test-1");
    }

    #[tokio::test]
    async fn empty_hooks_are_noops() {
        let pipeline = StartPipeline::new();
        let mut ctx = empty_context();
        pipeline.run(Hook::AfterStart, &mut ctx).await.unwrap();
    }
}
