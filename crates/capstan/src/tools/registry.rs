//! Tool definitions and the name-indexed catalog.
//!
//! A [`Tool`] describes one capability: identity, [`ToolKind`], argument
//! contract, batch dependencies, and resource tags. Calling
//! [`Tool::build`] with validated arguments produces a [`ToolInvocation`]
//! — the bound, executable form that knows its affected paths and whether
//! it wants operator confirmation.
//!
//! The [`ToolRegistry`] collects tools during startup and is read-only
//! afterwards: the scheduler and pipeline borrow it immutably, so there is
//! no registration-vs-lookup race by construction. Registration of a
//! duplicate name is an error, not a silent replace — two subsystems
//! fighting over a name is a wiring bug worth surfacing.

use crate::ToolDeclaration;
use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::tools::schema::{ArgSchema, NormalizedArgs};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

// ── Kinds and outputs ──────────────────────────────────────────────

/// Coarse category used for policy decisions and grouping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Read,
    Edit,
    Execute,
    Search,
    Network,
    Other,
}

impl ToolKind {
    /// Whether this kind mutates workspace state. Edit-kind execution is
    /// serialized per path by the lock manager.
    pub fn is_mutation(&self) -> bool {
        matches!(self, ToolKind::Edit)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolKind::Read => "read",
            ToolKind::Edit => "edit",
            ToolKind::Execute => "execute",
            ToolKind::Search => "search",
            ToolKind::Network => "network",
            ToolKind::Other => "other",
        };
        f.write_str(name)
    }
}

/// What a successful `execute` hands back: content for the model, and an
/// optional operator-facing rendering (defaults to the model content).
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub llm: String,
    pub display: Option<String>,
}

impl ToolOutput {
    pub fn text(llm: impl Into<String>) -> Self {
        Self {
            llm: llm.into(),
            display: None,
        }
    }

    pub fn with_display(mut self, display: impl Into<String>) -> Self {
        self.display = Some(display.into());
        self
    }
}

/// Details shown to the operator when an invocation asks for confirmation.
#[derive(Clone, Debug, PartialEq)]
pub struct ConfirmationDetails {
    /// One-line summary ("Overwrite /ws/a.txt", "Run `git push`").
    pub summary: String,
    /// Paths the operation will touch, when known.
    pub affected_paths: Vec<PathBuf>,
    /// The command line, for Execute-kind invocations.
    pub command: Option<String>,
}

impl ConfirmationDetails {
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            affected_paths: Vec::new(),
            command: None,
        }
    }
}

// ── Tool and ToolInvocation traits ─────────────────────────────────

/// Boxed future returned by [`ToolInvocation::execute`]. A type alias keeps
/// the trait dyn-compatible without `async fn` in the signature.
pub type InvocationFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send + 'a>>;

/// A tool call bound to concrete, validated arguments.
///
/// Built once per request by [`Tool::build`]; the pipeline consults
/// [`affected_paths`](ToolInvocation::affected_paths) for locking and
/// [`should_confirm`](ToolInvocation::should_confirm) before executing.
pub trait ToolInvocation: Send + Sync {
    /// Normalized absolute-or-workspace-relative paths this invocation
    /// touches. Empty for pure computations.
    fn affected_paths(&self) -> Vec<PathBuf> {
        Vec::new()
    }

    /// Ask the operator before running? `None` means no prompt beyond what
    /// the permission layer already decided.
    fn should_confirm(&self) -> Option<ConfirmationDetails> {
        None
    }

    /// Run the effectful operation. Must observe `ctx.cancellation`.
    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> InvocationFuture<'a>;
}

/// A capability the model can invoke.
///
/// Tools are created at startup, registered once, and never mutated.
/// Everything request-specific lives in the [`ToolInvocation`] produced by
/// [`build`](Tool::build).
pub trait Tool: Send + Sync {
    /// Unique, stable identifier.
    fn name(&self) -> &str;

    /// Human-facing name; defaults to [`name`](Tool::name).
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Description for the model and help listings.
    fn description(&self) -> &str;

    fn kind(&self) -> ToolKind;

    /// Argument contract. Consulted by the validation stage and rendered
    /// into the declaration sent to the model.
    fn schema(&self) -> ArgSchema;

    /// Whether successful results may be served from the session cache for
    /// identical arguments. Defaults to true for the side-effect-free
    /// kinds.
    fn cacheable(&self) -> bool {
        matches!(self.kind(), ToolKind::Read | ToolKind::Search)
    }

    /// Tool names that must complete before this one within a batch.
    fn dependencies(&self) -> Vec<String> {
        Vec::new()
    }

    /// Logical resources this tool uses. Two calls sharing a tag never run
    /// in the same scheduler stage.
    fn resource_tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// Bind validated arguments into an executable invocation.
    fn build(&self, args: NormalizedArgs) -> Result<Box<dyn ToolInvocation>, ToolError>;
}

// ── FnTool ─────────────────────────────────────────────────────────

/// Type-erased async handler for [`FnTool`].
type ErasedHandler = Arc<
    dyn Fn(
            NormalizedArgs,
            ExecutionContext,
        ) -> Pin<Box<dyn Future<Output = Result<ToolOutput, ToolError>> + Send>>
        + Send
        + Sync,
>;

/// Closure that derives affected paths from bound arguments.
type PathsFn = Arc<dyn Fn(&NormalizedArgs) -> Vec<PathBuf> + Send + Sync>;

/// Closure that derives a confirmation prompt from bound arguments.
type ConfirmFn = Arc<dyn Fn(&NormalizedArgs) -> Option<ConfirmationDetails> + Send + Sync>;

/// A closure-based tool for capabilities whose logic is a single async
/// function. Stateful tools (connections, caches) implement [`Tool`]
/// directly.
pub struct FnTool {
    name: String,
    description: String,
    kind: ToolKind,
    schema: ArgSchema,
    dependencies: Vec<String>,
    resource_tags: Vec<String>,
    handler: ErasedHandler,
    paths_fn: Option<PathsFn>,
    confirm_fn: Option<ConfirmFn>,
}

impl FnTool {
    pub fn new<F, Fut>(
        name: &str,
        description: &str,
        kind: ToolKind,
        schema: ArgSchema,
        handler: F,
    ) -> Self
    where
        F: Fn(NormalizedArgs, ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ToolOutput, ToolError>> + Send + 'static,
    {
        let erased: ErasedHandler = Arc::new(move |args, ctx| Box::pin(handler(args, ctx)));
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            schema,
            dependencies: Vec::new(),
            resource_tags: Vec::new(),
            handler: erased,
            paths_fn: None,
            confirm_fn: None,
        }
    }

    /// Declare batch dependencies (builder pattern).
    pub fn with_dependencies(mut self, deps: Vec<String>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Declare resource tags (builder pattern).
    pub fn with_resource_tags(mut self, tags: Vec<String>) -> Self {
        self.resource_tags = tags;
        self
    }

    /// Derive affected paths from the bound arguments.
    pub fn with_affected_paths<P>(mut self, f: P) -> Self
    where
        P: Fn(&NormalizedArgs) -> Vec<PathBuf> + Send + Sync + 'static,
    {
        self.paths_fn = Some(Arc::new(f));
        self
    }

    /// Derive a confirmation prompt from the bound arguments.
    pub fn with_confirmation<C>(mut self, f: C) -> Self
    where
        C: Fn(&NormalizedArgs) -> Option<ConfirmationDetails> + Send + Sync + 'static,
    {
        self.confirm_fn = Some(Arc::new(f));
        self
    }
}

struct FnInvocation {
    args: NormalizedArgs,
    handler: ErasedHandler,
    paths_fn: Option<PathsFn>,
    confirm_fn: Option<ConfirmFn>,
}

impl ToolInvocation for FnInvocation {
    fn affected_paths(&self) -> Vec<PathBuf> {
        self.paths_fn
            .as_ref()
            .map(|f| f(&self.args))
            .unwrap_or_default()
    }

    fn should_confirm(&self) -> Option<ConfirmationDetails> {
        self.confirm_fn.as_ref().and_then(|f| f(&self.args))
    }

    fn execute<'a>(&'a self, ctx: &'a ExecutionContext) -> InvocationFuture<'a> {
        (self.handler)(self.args.clone(), ctx.clone())
    }
}

impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn kind(&self) -> ToolKind {
        self.kind
    }

    fn schema(&self) -> ArgSchema {
        self.schema.clone()
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn resource_tags(&self) -> Vec<String> {
        self.resource_tags.clone()
    }

    fn build(&self, args: NormalizedArgs) -> Result<Box<dyn ToolInvocation>, ToolError> {
        Ok(Box::new(FnInvocation {
            args,
            handler: self.handler.clone(),
            paths_fn: self.paths_fn.clone(),
            confirm_fn: self.confirm_fn.clone(),
        }))
    }
}

impl fmt::Debug for FnTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}

// ── Registry ───────────────────────────────────────────────────────

/// Registration failed because the name is taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlreadyRegistered {
    pub name: String,
}

impl fmt::Display for AlreadyRegistered {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tool '{}' is already registered", self.name)
    }
}

impl std::error::Error for AlreadyRegistered {}

/// Name-indexed tool catalog with kind and tag reverse indices.
///
/// Populated during startup; read-only during scheduling. Lookup iterates
/// a `BTreeMap`, so declaration order is stable (name-sorted) without a
/// separate ordering pass.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    by_kind: HashMap<ToolKind, Vec<String>>,
    by_tag: BTreeMap<String, Vec<String>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Fails if the name is already taken.
    pub fn register(&mut self, tool: impl Tool + 'static) -> Result<(), AlreadyRegistered> {
        self.register_arc(Arc::new(tool))
    }

    /// Register a shared tool. Fails if the name is already taken.
    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) -> Result<(), AlreadyRegistered> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(AlreadyRegistered { name });
        }
        self.by_kind
            .entry(tool.kind())
            .or_default()
            .push(name.clone());
        for tag in tool.resource_tags() {
            self.by_tag.entry(tag).or_default().push(name.clone());
        }
        self.tools.insert(name, tool);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// All registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    /// Names of tools of the given kind, in registration order.
    pub fn of_kind(&self, kind: ToolKind) -> &[String] {
        self.by_kind.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of tools carrying the given resource tag.
    pub fn with_tag(&self, tag: &str) -> &[String] {
        self.by_tag.get(tag).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Declarations for the tool-call surface, in stable name order.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .values()
            .map(|tool| ToolDeclaration {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.schema().to_json_schema(),
            })
            .collect()
    }

    /// Declarations trimmed to fit a token budget. Returns the (possibly
    /// shortened) declarations and a report when trimming happened.
    pub fn declarations_within(
        &self,
        budget: &DeclarationBudget,
    ) -> (Vec<ToolDeclaration>, Option<TrimReport>) {
        trim_to_budget(self.declarations(), budget)
    }
}

impl fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .finish()
    }
}

// ── Declaration budget ─────────────────────────────────────────────

/// Token budget for the declaration list sent with every model request.
#[derive(Debug, Clone)]
pub struct DeclarationBudget {
    /// Target estimated tokens for the full declaration list.
    pub max_tokens: usize,
    /// Tools whose descriptions are never shortened.
    pub protected: HashSet<String>,
}

impl Default for DeclarationBudget {
    fn default() -> Self {
        Self {
            max_tokens: 6000,
            protected: HashSet::new(),
        }
    }
}

/// What the trim pass did, for logging and operator display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimReport {
    pub before_tokens: usize,
    pub after_tokens: usize,
    /// Names of tools whose descriptions were shortened, in list order.
    pub shortened: Vec<String>,
}

/// Serialized-JSON bytes per estimated token.
const BYTES_PER_TOKEN: usize = 4;

/// Shortened descriptions keep at least this many bytes.
const MIN_KEPT_CHARS: usize = 64;

/// Appended to every shortened description.
const SHORTENED_SUFFIX: char = '…';

/// Estimate one declaration's cost from its serialized wire form — the
/// schema payload counts the same way the model will see it.
fn declaration_tokens(decl: &ToolDeclaration) -> usize {
    let bytes = serde_json::to_string(decl).map(|s| s.len()).unwrap_or(0);
    bytes.div_ceil(BYTES_PER_TOKEN)
}

fn list_tokens(decls: &[ToolDeclaration]) -> usize {
    decls.iter().map(declaration_tokens).sum()
}

/// Shorten descriptions until the list fits the budget.
///
/// Two passes over the unprotected tools. First, every description is
/// clamped to its leading sentence — descriptions front-load the summary,
/// so the guidance tail is the cheap part to lose. If the list still does
/// not fit, the remaining overflow is taken from the surviving
/// descriptions proportionally to their length, down to a floor. Schema
/// payloads are never touched: dropping constraints would change tool
/// behavior, not just its prose.
fn trim_to_budget(
    mut decls: Vec<ToolDeclaration>,
    budget: &DeclarationBudget,
) -> (Vec<ToolDeclaration>, Option<TrimReport>) {
    let before_tokens = list_tokens(&decls);
    if before_tokens <= budget.max_tokens {
        return (decls, None);
    }

    let mut shortened: Vec<String> = Vec::new();

    // Pass 1: clamp to the leading sentence.
    for decl in decls.iter_mut() {
        if budget.protected.contains(&decl.name) {
            continue;
        }
        if let Some(lead) = leading_sentence(&decl.description)
            && lead.len() < decl.description.len()
        {
            decl.description = format!("{lead}{SHORTENED_SUFFIX}");
            shortened.push(decl.name.clone());
        }
    }

    let mut after_tokens = list_tokens(&decls);

    // Pass 2: spread any remaining overflow proportionally to length.
    if after_tokens > budget.max_tokens {
        let overflow_bytes = (after_tokens - budget.max_tokens) * BYTES_PER_TOKEN;
        let candidates: Vec<usize> = decls
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                !budget.protected.contains(&d.name) && d.description.len() > MIN_KEPT_CHARS
            })
            .map(|(i, _)| i)
            .collect();
        let pool: usize = candidates.iter().map(|&i| decls[i].description.len()).sum();

        if pool > 0 {
            for &index in &candidates {
                let length = decls[index].description.len();
                let share = overflow_bytes * length / pool;
                let keep = length.saturating_sub(share).max(MIN_KEPT_CHARS);
                if keep >= length {
                    continue;
                }
                let keep = decls[index].description.floor_char_boundary(keep);
                let mut kept = decls[index].description[..keep].to_string();
                kept.push(SHORTENED_SUFFIX);
                decls[index].description = kept;
                if !shortened.contains(&decls[index].name) {
                    shortened.push(decls[index].name.clone());
                }
            }
            after_tokens = list_tokens(&decls);
        }
    }

    (
        decls,
        Some(TrimReport {
            before_tokens,
            after_tokens,
            shortened,
        }),
    )
}

/// The first sentence of a description's first line.
fn leading_sentence(text: &str) -> Option<&str> {
    let line = text.lines().next()?;
    match line.find(". ") {
        Some(end) => Some(&line[..=end]),
        None => Some(line),
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::PermissionMode;
    use crate::tools::schema::FieldSpec;
    use serde_json::json;

    fn echo_tool() -> FnTool {
        FnTool::new(
            "echo",
            "Echo the input text",
            ToolKind::Read,
            ArgSchema::object(vec![FieldSpec::string("text").required()]),
            |args, _ctx| async move {
                Ok(ToolOutput::text(args.str("text").unwrap_or("").to_string()))
            },
        )
    }

    fn edit_tool() -> FnTool {
        FnTool::new(
            "write_note",
            "Write a note file",
            ToolKind::Edit,
            ArgSchema::object(vec![FieldSpec::string("file_path").required()]),
            |_args, _ctx| async move { Ok(ToolOutput::text("written")) },
        )
        .with_resource_tags(vec!["notes".into()])
        .with_affected_paths(|args| {
            args.str("file_path").map(PathBuf::from).into_iter().collect()
        })
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();
        assert!(registry.get("echo").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn duplicate_registration_fails() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();
        let err = registry.register(echo_tool()).unwrap_err();
        assert_eq!(err.name, "echo");
        assert!(err.to_string().contains("already registered"));
    }

    #[test]
    fn kind_and_tag_indices() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool()).unwrap();
        registry.register(edit_tool()).unwrap();
        assert_eq!(registry.of_kind(ToolKind::Read), ["echo"]);
        assert_eq!(registry.of_kind(ToolKind::Edit), ["write_note"]);
        assert!(registry.of_kind(ToolKind::Network).is_empty());
        assert_eq!(registry.with_tag("notes"), ["write_note"]);
    }

    #[test]
    fn declarations_are_name_sorted() {
        let mut registry = ToolRegistry::new();
        registry.register(edit_tool()).unwrap();
        registry.register(echo_tool()).unwrap();
        let decls = registry.declarations();
        let names: Vec<&str> = decls.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, ["echo", "write_note"]);
        assert_eq!(decls[0].parameters["type"], "object");
    }

    #[tokio::test]
    async fn fn_tool_builds_and_executes() {
        let tool = echo_tool();
        let args = tool.schema().validate(&json!({ "text": "hi" })).unwrap();
        let invocation = tool.build(args).unwrap();
        let ctx = ExecutionContext::new("s", "/ws", PermissionMode::Default);
        let output = invocation.execute(&ctx).await.unwrap();
        assert_eq!(output.llm, "hi");
    }

    #[test]
    fn fn_tool_derives_affected_paths() {
        let tool = edit_tool();
        let args = tool
            .schema()
            .validate(&json!({ "file_path": "/ws/n.txt" }))
            .unwrap();
        let invocation = tool.build(args).unwrap();
        assert_eq!(invocation.affected_paths(), [PathBuf::from("/ws/n.txt")]);
        assert!(invocation.should_confirm().is_none());
    }

    #[test]
    fn fn_tool_confirmation_closure() {
        let tool = FnTool::new(
            "rm",
            "Remove a file",
            ToolKind::Edit,
            ArgSchema::object(vec![FieldSpec::string("file_path").required()]),
            |_a, _c| async move { Ok(ToolOutput::text("gone")) },
        )
        .with_confirmation(|args| {
            Some(ConfirmationDetails::new(format!(
                "Remove {}",
                args.str("file_path").unwrap_or("?")
            )))
        });
        let args = tool
            .schema()
            .validate(&json!({ "file_path": "/ws/x" }))
            .unwrap();
        let invocation = tool.build(args).unwrap();
        let details = invocation.should_confirm().unwrap();
        assert_eq!(details.summary, "Remove /ws/x");
    }

    // ── Declaration budget ─────────────────────────────────────────

    fn decl_with(name: &str, description: &str) -> ToolDeclaration {
        ToolDeclaration {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({ "type": "object", "properties": {} }),
        }
    }

    /// A multi-sentence description: a short summary and a long tail.
    fn wordy(tail_words: usize) -> String {
        format!("Reads a file. {}", "guidance ".repeat(tail_words))
    }

    #[test]
    fn within_budget_is_left_alone() {
        let decls = vec![decl_with("a", &wordy(10))];
        let (out, report) = trim_to_budget(decls.clone(), &DeclarationBudget::default());
        assert!(report.is_none());
        assert_eq!(out[0].description, decls[0].description);
    }

    #[test]
    fn overflow_clamps_to_the_leading_sentence_first() {
        let decls = vec![decl_with("a", &wordy(400)), decl_with("b", &wordy(5))];
        let budget = DeclarationBudget {
            max_tokens: 200,
            ..Default::default()
        };
        let (out, report) = trim_to_budget(decls, &budget);
        let report = report.unwrap();
        assert!(out[0].description.starts_with("Reads a file."));
        assert!(out[0].description.ends_with(SHORTENED_SUFFIX));
        assert!(report.after_tokens < report.before_tokens);
        assert_eq!(report.shortened, ["a", "b"]);
    }

    #[test]
    fn proportional_pass_respects_the_floor() {
        // One long sentence: pass 1 cannot shorten it, pass 2 must.
        let decls = vec![decl_with("a", &"w".repeat(4000))];
        let budget = DeclarationBudget {
            max_tokens: 40,
            ..Default::default()
        };
        let (out, report) = trim_to_budget(decls, &budget);
        assert!(out[0].description.ends_with(SHORTENED_SUFFIX));
        assert!(out[0].description.len() < 4000);
        assert!(out[0].description.len() >= MIN_KEPT_CHARS);
        assert_eq!(report.unwrap().shortened, ["a"]);
    }

    #[test]
    fn protected_descriptions_are_never_shortened() {
        let long = wordy(400);
        let decls = vec![decl_with("keep", &long), decl_with("trim", &long)];
        let budget = DeclarationBudget {
            max_tokens: 100,
            protected: HashSet::from(["keep".to_string()]),
        };
        let (out, report) = trim_to_budget(decls, &budget);
        assert_eq!(out[0].description, long);
        assert!(out[1].description.len() < long.len());
        assert_eq!(report.unwrap().shortened, ["trim"]);
    }

    #[test]
    fn schemas_are_never_touched() {
        let parameters = json!({
            "type": "object",
            "properties": { "file_path": { "type": "string" } },
            "required": ["file_path"],
        });
        let decls = vec![ToolDeclaration {
            name: "a".into(),
            description: wordy(400),
            parameters: parameters.clone(),
        }];
        let budget = DeclarationBudget {
            max_tokens: 30,
            ..Default::default()
        };
        let (out, _) = trim_to_budget(decls, &budget);
        assert_eq!(out[0].parameters, parameters);
    }

    #[test]
    fn leading_sentence_stops_at_boundary_or_line() {
        assert_eq!(
            leading_sentence("Reads a file. More detail."),
            Some("Reads a file.")
        );
        assert_eq!(
            leading_sentence("First line\nsecond line"),
            Some("First line")
        );
        assert_eq!(leading_sentence("no boundary here"), Some("no boundary here"));
        assert_eq!(leading_sentence(""), None);
    }
}
