//! Diff-driven task planner.
//!
//! A pure mapping from the changed files of a deployment to the maintenance
//! steps the server needs. Rules live in one table with an explicit rank;
//! the plan is the matching rules sorted by rank, so the order never depends
//! on how the table happens to be written.

use std::sync::LazyLock;

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::models::plan::TaskStep;
use crate::utils::shell_quote;

const BACKEND_MANIFESTS: &[&str] = &["**/composer.json", "**/composer.lock"];
const MIGRATIONS: &[&str] = &["database/migrations/**/*.php"];
const JS_MANIFESTS: &[&str] = &["**/package.json", "**/package-lock.json"];
const FRONTEND_SOURCES: &[&str] = &["**/*.{vue,js,jsx,ts,tsx,css,scss}"];
const BACKEND_SOURCES: &[&str] = &["**/*.php"];

fn glob_set(patterns: &[&str]) -> GlobSet {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).expect("static glob pattern"));
    }
    builder.build().expect("static glob set")
}

struct Matchers {
    backend_manifests: GlobSet,
    migrations: GlobSet,
    js_manifests: GlobSet,
    frontend_sources: GlobSet,
    backend_sources: GlobSet,
}

static MATCHERS: LazyLock<Matchers> = LazyLock::new(|| Matchers {
    backend_manifests: glob_set(BACKEND_MANIFESTS),
    migrations: glob_set(MIGRATIONS),
    js_manifests: glob_set(JS_MANIFESTS),
    frontend_sources: glob_set(FRONTEND_SOURCES),
    backend_sources: glob_set(BACKEND_SOURCES),
});

/// What kinds of files a change set touches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChangeFlags {
    pub backend_manifest: bool,
    pub migrations: bool,
    pub js_manifest: bool,
    pub frontend_source: bool,
    pub backend_source: bool,
}

impl ChangeFlags {
    pub fn classify(changed_files: &[String]) -> Self {
        let m = &*MATCHERS;
        let any = |set: &GlobSet| changed_files.iter().any(|f| set.is_match(f));
        Self {
            backend_manifest: any(&m.backend_manifests),
            migrations: any(&m.migrations),
            js_manifest: any(&m.js_manifests),
            frontend_source: any(&m.frontend_sources),
            backend_source: any(&m.backend_sources),
        }
    }
}

/// Everything a rule may look at
#[derive(Debug, Clone, Copy)]
pub struct PlanInput<'a> {
    pub branch: &'a str,
    pub is_framework_project: bool,
    pub changed_files: &'a [String],
    /// Horizon is installed, so queue workers restart through it
    pub queue_dashboard_configured: bool,
    /// Command used to invoke the runtime, e.g. `php` or `php8.3`
    pub runtime_prefix: &'a str,
}

struct Rule {
    rank: u8,
    framework_only: bool,
    applies: fn(&ChangeFlags) -> bool,
    step: fn(&PlanInput<'_>) -> TaskStep,
}

const RULES: &[Rule] = &[
    Rule {
        rank: 0,
        framework_only: false,
        applies: |_| true,
        step: pull_step,
    },
    Rule {
        rank: 1,
        framework_only: true,
        applies: |f| f.backend_manifest,
        step: composer_install_step,
    },
    Rule {
        rank: 2,
        framework_only: true,
        applies: |f| f.migrations,
        step: |input| TaskStep::new("Run database migrations", artisan(input, "migrate --force")),
    },
    Rule {
        rank: 3,
        framework_only: true,
        applies: |f| f.js_manifest,
        step: |_| {
            TaskStep::new(
                "Install Node dependencies",
                "if [ -f package-lock.json ]; then npm ci; else npm install; fi",
            )
        },
    },
    // Any dependency install can change compiled assets, so it forces a build.
    Rule {
        rank: 4,
        framework_only: true,
        applies: |f| f.backend_manifest || f.js_manifest || f.frontend_source,
        step: |_| TaskStep::new("Compile frontend assets", "npm run build"),
    },
    Rule {
        rank: 5,
        framework_only: true,
        applies: |f| f.backend_source,
        step: |input| TaskStep::new("Clear Laravel caches", artisan(input, "optimize:clear")),
    },
    Rule {
        rank: 6,
        framework_only: true,
        applies: |f| f.backend_source,
        step: queue_restart_step,
    },
];

fn artisan(input: &PlanInput<'_>, args: &str) -> String {
    format!("{} artisan {}", input.runtime_prefix, args)
}

fn pull_step(input: &PlanInput<'_>) -> TaskStep {
    TaskStep::new(
        format!("Pull latest changes for {}", input.branch),
        format!("git pull origin {}", shell_quote(input.branch)),
    )
}

fn composer_install_step(input: &PlanInput<'_>) -> TaskStep {
    let composer = if input.runtime_prefix == "php" {
        "composer".to_string()
    } else {
        format!("{} $(command -v composer)", input.runtime_prefix)
    };
    TaskStep::new(
        "Install Composer dependencies",
        format!(
            "if [ ! -f composer.lock ]; then echo 'composer.lock is missing; refusing to resolve dependencies on the server' >&2; exit 1; fi; \
             {} install --no-dev --no-interaction --prefer-dist --optimize-autoloader",
            composer
        ),
    )
}

fn queue_restart_step(input: &PlanInput<'_>) -> TaskStep {
    if input.queue_dashboard_configured {
        TaskStep::new("Restart Horizon workers", artisan(input, "horizon:terminate"))
    } else {
        TaskStep::new("Restart queue workers", artisan(input, "queue:restart"))
    }
}

/// Compute the ordered maintenance steps for a change set
pub fn plan(input: &PlanInput<'_>) -> Vec<TaskStep> {
    let flags = ChangeFlags::classify(input.changed_files);

    let mut selected: Vec<&Rule> = RULES
        .iter()
        .filter(|rule| !rule.framework_only || input.is_framework_project)
        .filter(|rule| (rule.applies)(&flags))
        .collect();
    selected.sort_by_key(|rule| rule.rank);

    selected.into_iter().map(|rule| (rule.step)(input)).collect()
}
