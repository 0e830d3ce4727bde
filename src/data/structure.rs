use serde::Serialize;

/// Repository-relative location of the generated health test file.
pub const HEALTH_TEST_PATH: &str = "tests/test_health.py";

/// The discovered shape of a FastAPI service repository.
///
/// `entry_point` is `None` exactly when no application construction was
/// found anywhere in the scanned tree. All paths are repository-relative
/// and use forward slashes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplicationStructure {
    /// File holding the `FastAPI()` construction (direct or factory).
    pub entry_point: Option<String>,
    /// Variable bound to the app, or the factory function name.
    pub app_variable: String,
    /// Files declaring `APIRouter()` instances, in scan order.
    pub router_files: Vec<String>,
    /// Dependency manifest found at the repository root.
    pub manifest: Option<String>,
    /// Middleware symbols registered in the entry-point file.
    pub middleware: Vec<String>,
    /// True if the app is built inside a function.
    pub factory_pattern: bool,
}

impl Default for ApplicationStructure {
    fn default() -> Self {
        Self {
            entry_point: None,
            app_variable: "app".to_string(),
            router_files: Vec::new(),
            manifest: None,
            middleware: Vec::new(),
            factory_pattern: false,
        }
    }
}

impl ApplicationStructure {
    /// Directory of the entry point, `""` when it lives at the root.
    pub fn entry_dir(&self) -> Option<&str> {
        let entry = self.entry_point.as_deref()?;
        Some(entry.rsplit_once('/').map(|(dir, _)| dir).unwrap_or(""))
    }

    /// Dotted module path of the entry point (`app/main.py` -> `app.main`).
    pub fn entry_module(&self) -> Option<String> {
        let entry = self.entry_point.as_deref()?;
        let stem = entry.strip_suffix(".py").unwrap_or(entry);
        Some(stem.replace('/', "."))
    }

    /// Manifest to update, defaulting to `requirements.txt`.
    pub fn manifest_or_default(&self) -> &str {
        self.manifest.as_deref().unwrap_or("requirements.txt")
    }

    /// Locations of the support files colocated with the entry point.
    pub fn support_paths(&self) -> SupportPaths {
        SupportPaths::for_dir(self.entry_dir().unwrap_or(""))
    }
}

/// Where the generated support modules live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SupportPaths {
    pub middleware: String,
    pub logging_config: String,
    pub health_test: String,
    /// Dotted package prefix for imports, empty at the root.
    pub package: String,
}

impl SupportPaths {
    pub fn for_dir(dir: &str) -> Self {
        let dir = dir.trim_matches('/');
        let join = |file: &str| {
            if dir.is_empty() {
                file.to_string()
            } else {
                format!("{}/{}", dir, file)
            }
        };
        Self {
            middleware: join("middleware.py"),
            logging_config: join("logging_config.py"),
            health_test: HEALTH_TEST_PATH.to_string(),
            package: dir.replace('/', "."),
        }
    }

    /// Dotted import path of a sibling module of the entry point.
    pub fn module(&self, name: &str) -> String {
        if self.package.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.package, name)
        }
    }
}
