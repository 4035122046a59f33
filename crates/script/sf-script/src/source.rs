//! Script documents: reading, compiling and assembling them into a library.

use crate::config::{EngineLimits, ScriptConfig};
use crate::invocation::create_engine;
use crate::registry::{FunctionEntry, FunctionRegistry};
use hashbrown::HashSet;
use rhai::{Engine, AST};
use sf_error::{Result, ScriptError, SfError};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

/// Separator between namespace and function name.
pub const NAMESPACE_SEPARATOR: &str = "::";

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Raw script text plus where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDocument {
    /// Logical document name used in errors and logs.
    pub name: String,

    /// Rhai source text.
    pub source: String,

    /// Optional namespace for the document's functions.
    pub namespace: Option<String>,
}

impl SourceDocument {
    /// Creates a non-namespaced document.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
            namespace: None,
        }
    }

    /// Places the document's functions in a namespace.
    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }
}

/// Signature of a function a document defines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<String>,
}

/// A compiled script document.
#[derive(Debug, Clone)]
pub struct ScriptDocument {
    name: String,
    namespace: Option<String>,
    source: String,
    functions: Vec<FunctionSignature>,
}

impl ScriptDocument {
    /// Document name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Namespace, if any.
    pub fn namespace(&self) -> Option<&str> {
        self.namespace.as_deref()
    }

    /// Source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Functions the document defines, sorted by name then arity.
    pub fn functions(&self) -> &[FunctionSignature] {
        &self.functions
    }

    /// Returns true if the document defines `name`.
    pub fn defines(&self, name: &str) -> bool {
        self.functions.iter().any(|f| f.name == name)
    }

    fn qualify(&self, name: &str) -> String {
        match &self.namespace {
            Some(ns) => format!("{ns}{NAMESPACE_SEPARATOR}{name}"),
            None => name.to_string(),
        }
    }
}

/// Compiled functions shared by all documents of one namespace.
#[derive(Debug, Clone)]
pub(crate) struct Program {
    pub(crate) namespace: Option<String>,
    pub(crate) ast: AST,
}

/// A document together with its own compiled AST.
///
/// The AST is kept so every interpreter instance can run the document's
/// top-level statements once when it is provisioned.
#[derive(Debug, Clone)]
pub(crate) struct LoadedDocument {
    pub(crate) document: ScriptDocument,
    pub(crate) ast: AST,
    pub(crate) program: usize,
}

/// An immutable set of loaded documents and the functions they define.
///
/// Each load gets a new generation; handles resolved against one library
/// cannot be called on another.
#[derive(Debug)]
pub struct ScriptLibrary {
    generation: u64,
    documents: Vec<LoadedDocument>,
    programs: Vec<Program>,
    registry: FunctionRegistry,
}

impl ScriptLibrary {
    /// Generation of this library.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Function registry.
    pub fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Documents in load order.
    pub fn documents(&self) -> impl Iterator<Item = &ScriptDocument> {
        self.documents.iter().map(|d| &d.document)
    }

    pub(crate) fn loaded_documents(&self) -> &[LoadedDocument] {
        &self.documents
    }

    pub(crate) fn programs(&self) -> &[Program] {
        &self.programs
    }
}

/// Reads and compiles script documents.
pub struct ScriptSource {
    engine: Engine,
}

impl Default for ScriptSource {
    fn default() -> Self {
        Self::new(&EngineLimits::default())
    }
}

impl ScriptSource {
    /// Creates a source whose compiler applies `limits`.
    pub fn new(limits: &EngineLimits) -> Self {
        Self {
            engine: create_engine(limits),
        }
    }

    /// Reads the documents named by `configs`, in order.
    ///
    /// Inline documents without a name are called `inline-<index>`; file
    /// documents default to their path.
    pub async fn read_documents(configs: &[ScriptConfig]) -> Result<Vec<SourceDocument>> {
        let mut documents = Vec::with_capacity(configs.len());

        for (index, config) in configs.iter().enumerate() {
            config.validate()?;

            let (default_name, source) = match (&config.script, &config.script_file) {
                (Some(script), _) => (format!("inline-{index}"), script.clone()),
                (None, Some(path)) => (path.clone(), read_script_file(path).await?),
                (None, None) => {
                    return Err(SfError::Config(format!(
                        "script {index} has neither script nor script_file"
                    )))
                }
            };

            documents.push(SourceDocument {
                name: config.name.clone().unwrap_or(default_name),
                source,
                namespace: config.namespace.clone(),
            });
        }

        Ok(documents)
    }

    /// Compiles one document.
    pub fn compile(&self, document: &SourceDocument) -> Result<ScriptDocument> {
        self.compile_document(document)
            .map(|(document, _)| document)
            .map_err(Into::into)
    }

    fn compile_document(
        &self,
        document: &SourceDocument,
    ) -> std::result::Result<(ScriptDocument, AST), ScriptError> {
        let mut ast = self
            .engine
            .compile(&document.source)
            .map_err(|e| ScriptError::Load {
                document: document.name.clone(),
                message: e.0.to_string(),
                line: e.1.line(),
            })?;
        ast.set_source(document.name.as_str());

        let mut functions: Vec<FunctionSignature> = ast
            .iter_functions()
            .map(|f| FunctionSignature {
                name: f.name.to_string(),
                params: f.params.iter().map(|p| p.to_string()).collect(),
            })
            .collect();
        functions.sort_by(|a, b| {
            a.name
                .cmp(&b.name)
                .then(a.params.len().cmp(&b.params.len()))
        });

        let compiled = ScriptDocument {
            name: document.name.clone(),
            namespace: document.namespace.clone(),
            source: document.source.clone(),
            functions,
        };
        Ok((compiled, ast))
    }

    /// Compiles `documents` in order and assembles them into a library.
    ///
    /// Any document that fails to compile fails the whole load. When two
    /// documents in the same namespace define the same name, the later one
    /// wins and the earlier definition is no longer reachable.
    pub fn load(&self, documents: &[SourceDocument]) -> Result<ScriptLibrary> {
        let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        let mut registry = FunctionRegistry::new(generation);
        let mut programs = vec![Program {
            namespace: None,
            ast: AST::empty(),
        }];
        let mut loaded = Vec::with_capacity(documents.len());

        let compiled = documents
            .iter()
            .map(|d| self.compile_document(d))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        for (document, ast) in compiled {
            let program = match &document.namespace {
                None => 0,
                Some(ns) => match programs
                    .iter()
                    .position(|p| p.namespace.as_deref() == Some(ns.as_str()))
                {
                    Some(index) => index,
                    None => {
                        programs.push(Program {
                            namespace: Some(ns.clone()),
                            ast: AST::empty(),
                        });
                        programs.len() - 1
                    }
                },
            };

            let defined: HashSet<String> =
                document.functions.iter().map(|f| f.name.clone()).collect();
            let target = &mut programs[program].ast;
            target.retain_functions(|_, _, name, _| !defined.contains(name));
            target.combine(ast.clone_functions_only());

            for name in defined.iter().map(String::as_str) {
                let arities: Vec<usize> = document
                    .functions
                    .iter()
                    .filter(|f| f.name == name)
                    .map(|f| f.params.len())
                    .collect();
                let entry = FunctionEntry {
                    name: name.to_string(),
                    qualified_name: document.qualify(name),
                    document: document.name.clone(),
                    arities,
                    program,
                };
                if let Some(previous) = registry.register(entry) {
                    warn!(
                        function = %document.qualify(name),
                        previous = %previous.document,
                        document = %document.name,
                        "Function definition overridden"
                    );
                }
            }

            loaded.push(LoadedDocument {
                document,
                ast,
                program,
            });
        }

        info!(
            generation,
            documents = loaded.len(),
            functions = registry.len(),
            "Loaded script library"
        );

        Ok(ScriptLibrary {
            generation,
            documents: loaded,
            programs,
            registry,
        })
    }
}

async fn read_script_file(path: &str) -> std::result::Result<String, ScriptError> {
    let file = Path::new(path);
    if !file.exists() {
        return Err(ScriptError::Load {
            document: path.to_string(),
            message: "File not found".to_string(),
            line: None,
        });
    }

    tokio::fs::read_to_string(file)
        .await
        .map_err(|e| ScriptError::Load {
            document: path.to_string(),
            message: format!("Failed to read: {e}"),
            line: None,
        })
}
