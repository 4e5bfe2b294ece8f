//! Dockerfile synthesis: emits a multi-stage recipe per detected runtime
//! that honors the `PORT` contract, then validates what it wrote.

use std::path::Path;

use serde_json::Value;
use tracing::{info, instrument};

use crate::platform_error::{PlatformError, PlatformResult};

use super::runtime::Runtime;

/// Default internal port baked into `ENV PORT=<default>` when nothing in the
/// start command overrides it; matches `PlatformConfig::internal_port`'s
/// usual value but is intentionally a plain literal here, since the
/// generated Dockerfile must be self-contained even if read outside the
/// platform's own configuration.
const DEFAULT_PORT: u16 = 8080;

/// Names the synthesizer always renames aside before writing its own
/// Dockerfile, per the platform's "user Dockerfiles are ignored" policy.
const DOCKERFILE_NAME: &str = "Dockerfile";

/// The written recipe plus the facts the worker-vs-web classifier needs.
#[derive(Debug, Clone)]
pub struct SynthesizedRecipe {
    /// Full generated Dockerfile content, as written to disk.
    pub dockerfile: String,
    /// Whether the recipe declares an `EXPOSE` instruction.
    pub has_expose: bool,
    /// Whether the recipe declares an `ENV PORT` instruction.
    pub has_env_port: bool,
    /// The resolved start command (the `CMD`/`ENTRYPOINT` argument list, joined).
    pub start_command: String,
}

/// Generates and validates a Dockerfile for `runtime` at `root`, overwriting
/// any existing one (renamed aside first, per policy: the platform's own
/// generated file is what gets validated, not whatever the repository shipped).
#[instrument(skip(root), fields(?runtime))]
pub async fn synthesize(root: &Path, runtime: Runtime) -> PlatformResult<SynthesizedRecipe> {
    let existing = root.join(DOCKERFILE_NAME);
    if tokio::fs::try_exists(&existing).await.unwrap_or(false) {
        let aside = root.join(format!("{DOCKERFILE_NAME}.user"));
        tokio::fs::rename(&existing, &aside)
            .await
            .map_err(|e| PlatformError::io("renaming aside existing Dockerfile", e))?;
        info!("existing Dockerfile renamed aside; platform recipe takes precedence");
    }

    let recipe = match runtime {
        Runtime::Node => synthesize_node(root).await?,
        Runtime::Python => synthesize_python(root).await?,
        Runtime::Java => synthesize_java(root).await?,
        Runtime::Go => synthesize_go(root).await?,
    };

    tokio::fs::write(&existing, &recipe.dockerfile)
        .await
        .map_err(|e| PlatformError::io("writing synthesized Dockerfile", e))?;

    validate(&recipe, runtime)?;

    Ok(recipe)
}

fn validate(recipe: &SynthesizedRecipe, runtime: Runtime) -> PlatformResult<()> {
    let has_cmd = recipe.dockerfile.contains("CMD") || recipe.dockerfile.contains("ENTRYPOINT");
    if !has_cmd {
        return Err(PlatformError::BuildFailed {
            exit_code: -1,
            tail: "synthesized recipe has no CMD or ENTRYPOINT".to_string(),
        });
    }
    if !recipe.has_env_port {
        return Err(PlatformError::BuildFailed {
            exit_code: -1,
            tail: "synthesized recipe has no ENV PORT".to_string(),
        });
    }
    let needs_port_substitution = matches!(runtime, Runtime::Java | Runtime::Python)
        && (recipe.start_command.contains("uvicorn") || recipe.start_command.contains("gunicorn") || recipe.start_command.contains("-Dserver.port"));
    if needs_port_substitution && !recipe.start_command.contains("PORT") {
        return Err(PlatformError::BuildFailed {
            exit_code: -1,
            tail: "framework start command does not reference PORT".to_string(),
        });
    }
    Ok(())
}

async fn synthesize_node(root: &Path) -> PlatformResult<SynthesizedRecipe> {
    let package_json = read_json(&root.join("package.json")).await?;
    let has_lockfile = exists(root, "package-lock.json").await
        || exists(root, "yarn.lock").await
        || exists(root, "pnpm-lock.yaml").await;
    let install_cmd = if has_lockfile { "npm ci --only=production" } else { "npm install --only=production" };

    let start_script = package_json
        .get("scripts")
        .and_then(|s| s.get("start"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let entry = if start_script.is_none() {
        ["server.js", "app.js", "index.js", "main.js"]
            .into_iter()
            .find(|candidate| std::path::Path::new(root).join(candidate).exists())
            .map(str::to_string)
    } else {
        None
    };

    let start_command = match (&start_script, &entry) {
        (Some(_), _) => "npm start".to_string(),
        (None, Some(entry)) => format!("node {entry}"),
        (None, None) => "node index.js".to_string(),
    };

    let dockerfile = format!(
        "FROM node:20-alpine\n\
         WORKDIR /app\n\
         ENV PORT={DEFAULT_PORT}\n\
         EXPOSE {DEFAULT_PORT}\n\
         COPY package*.json ./\n\
         RUN {install_cmd}\n\
         COPY . .\n\
         CMD [{quoted_start}]\n",
        quoted_start = shell_quote(&start_command),
    );

    Ok(SynthesizedRecipe {
        dockerfile,
        has_expose: true,
        has_env_port: true,
        start_command,
    })
}

async fn synthesize_python(root: &Path) -> PlatformResult<SynthesizedRecipe> {
    let install_source = if exists(root, "requirements.txt").await {
        "COPY requirements.txt .\nRUN pip install --no-cache-dir -r requirements.txt"
    } else {
        "COPY pyproject.toml .\nRUN pip install --no-cache-dir ."
    };

    let entry = ["app.py", "main.py", "server.py", "application.py", "wsgi.py"]
        .into_iter()
        .find(|candidate| root.join(candidate).exists());

    let (start_command, module) = match entry {
        Some(file) => {
            let module = file.trim_end_matches(".py").to_string();
            let contents = tokio::fs::read_to_string(root.join(file)).await.unwrap_or_default();
            if contents.contains("fastapi") || contents.contains("FastAPI") {
                (format!("uvicorn {module}:app --host 0.0.0.0 --port ${{PORT}}"), module)
            } else if contents.contains("flask") || contents.contains("Flask") {
                (format!("gunicorn -w 4 -b 0.0.0.0:${{PORT}} {module}:app"), module)
            } else {
                (format!("python {file}"), module)
            }
        }
        None => ("python app.py".to_string(), "app".to_string()),
    };
    let _ = module;

    let dockerfile = format!(
        "FROM python:3.11-slim\n\
         WORKDIR /app\n\
         ENV PORT={DEFAULT_PORT}\n\
         EXPOSE {DEFAULT_PORT}\n\
         {install_source}\n\
         COPY . .\n\
         CMD {start_command}\n",
    );

    Ok(SynthesizedRecipe {
        dockerfile,
        has_expose: true,
        has_env_port: true,
        start_command,
    })
}

async fn synthesize_java(root: &Path) -> PlatformResult<SynthesizedRecipe> {
    let (builder_base, build_cmd, artifact_glob) = if exists(root, "pom.xml").await {
        ("maven:3.9-eclipse-temurin-17", "mvn -q -DskipTests package", "target/*.jar")
    } else {
        ("gradle:8-jdk17", "gradle build -x test", "build/libs/*.jar")
    };

    let start_command = format!("java -jar -Dserver.port=${{PORT}} app.jar");

    let dockerfile = format!(
        "FROM {builder_base} AS builder\n\
         WORKDIR /build\n\
         COPY . .\n\
         RUN {build_cmd}\n\
         \n\
         FROM eclipse-temurin:17-jre-alpine\n\
         WORKDIR /app\n\
         ENV PORT={DEFAULT_PORT}\n\
         EXPOSE {DEFAULT_PORT}\n\
         COPY --from=builder /build/{artifact_glob} app.jar\n\
         CMD {start_command}\n",
    );

    Ok(SynthesizedRecipe {
        dockerfile,
        has_expose: true,
        has_env_port: true,
        start_command,
    })
}

async fn synthesize_go(root: &Path) -> PlatformResult<SynthesizedRecipe> {
    let entry = if root.join("main.go").exists() {
        ".".to_string()
    } else if root.join("cmd").is_dir() {
        let mut entries = tokio::fs::read_dir(root.join("cmd"))
            .await
            .map_err(|e| PlatformError::io("scanning cmd/ for Go entrypoint", e))?;
        let mut found = "./cmd".to_string();
        if let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| PlatformError::io("scanning cmd/ for Go entrypoint", e))?
        {
            found = format!("./cmd/{}", entry.file_name().to_string_lossy());
        }
        found
    } else {
        ".".to_string()
    };

    let start_command = "/app/server".to_string();

    let dockerfile = format!(
        "FROM golang:1.21-alpine AS builder\n\
         WORKDIR /build\n\
         COPY . .\n\
         RUN go build -o /app/server {entry}\n\
         \n\
         FROM alpine\n\
         RUN apk add --no-cache ca-certificates\n\
         WORKDIR /app\n\
         ENV PORT={DEFAULT_PORT}\n\
         EXPOSE {DEFAULT_PORT}\n\
         COPY --from=builder /app/server .\n\
         CMD [\"{start_command}\"]\n",
    );

    Ok(SynthesizedRecipe {
        dockerfile,
        has_expose: true,
        has_env_port: true,
        start_command,
    })
}

async fn read_json(path: &Path) -> PlatformResult<Value> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| PlatformError::io("reading package.json", e))?;
    serde_json::from_str(&contents).map_err(|e| PlatformError::internal(format!("invalid package.json: {e}")))
}

async fn exists(root: &Path, name: &str) -> bool {
    tokio::fs::try_exists(root.join(name)).await.unwrap_or(false)
}

fn shell_quote(command: &str) -> String {
    command
        .split_whitespace()
        .map(|part| format!("\"{part}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn node_recipe_honors_port_contract() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(
            tmp.path().join("package.json"),
            br#"{"scripts": {"start": "node server.js"}}"#,
        )
        .unwrap();
        let recipe = synthesize(tmp.path(), Runtime::Node).await.unwrap();
        assert!(recipe.has_env_port);
        assert!(recipe.has_expose);
        assert!(recipe.dockerfile.contains("ENV PORT=8080"));
    }

    #[tokio::test]
    async fn existing_dockerfile_is_renamed_aside_not_kept() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("package.json"), br#"{}"#).unwrap();
        fs::write(tmp.path().join("Dockerfile"), b"FROM scratch").unwrap();
        synthesize(tmp.path(), Runtime::Node).await.unwrap();
        let written = fs::read_to_string(tmp.path().join("Dockerfile")).unwrap();
        assert!(written.contains("node:20-alpine"));
        assert!(tmp.path().join("Dockerfile.user").exists());
    }

    #[tokio::test]
    async fn python_fastapi_start_command_references_port() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("requirements.txt"), b"fastapi\nuvicorn").unwrap();
        fs::write(tmp.path().join("app.py"), b"from fastapi import FastAPI\napp = FastAPI()").unwrap();
        let recipe = synthesize(tmp.path(), Runtime::Python).await.unwrap();
        assert!(recipe.start_command.contains("uvicorn"));
        assert!(recipe.start_command.contains("PORT"));
    }
}
