use anyhow::{Context, Result};
use ollamacode_core::{Registry, runtime_dir, user_runtime_dir};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

pub const SKILL_FILE: &str = "SKILL.md";

/// A prompt template loaded from a `SKILL.md` file. The id is the name of the
/// directory holding the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skill {
    pub id: String,
    pub name: String,
    pub description: String,
    pub path: PathBuf,
    pub template: String,
}

pub struct SkillRegistry {
    workspace: PathBuf,
    skills: Registry<Skill>,
}

impl SkillRegistry {
    pub fn empty(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
            skills: Registry::new("skill"),
        }
    }

    /// Project skills, then user skills, then `configured_paths` (relative to
    /// the workspace unless absolute). The first skill with a given id wins.
    pub fn load(workspace: &Path, configured_paths: &[String]) -> Result<Self> {
        let mut roots = vec![runtime_dir(workspace).join("skills")];
        if let Some(user) = user_runtime_dir() {
            roots.push(user.join("skills"));
        }
        for raw in configured_paths {
            let path = Path::new(raw);
            roots.push(if path.is_absolute() {
                path.to_path_buf()
            } else {
                workspace.join(path)
            });
        }
        Self::load_from_roots(workspace, &roots)
    }

    pub fn load_from_roots(workspace: &Path, roots: &[PathBuf]) -> Result<Self> {
        let registry = Self::empty(workspace);
        for root in roots {
            if !root.is_dir() {
                continue;
            }
            let mut found = WalkDir::new(root)
                .follow_links(false)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file() && entry.file_name() == SKILL_FILE)
                .map(|entry| entry.into_path())
                .collect::<Vec<_>>();
            found.sort();
            for path in found {
                let skill = read_skill(&path)?;
                if registry.skills.contains(&skill.id) {
                    continue;
                }
                registry.skills.register(skill.id.clone(), Arc::new(skill))?;
            }
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Skill>> {
        self.skills.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.skills.contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.skills.names()
    }

    pub fn list(&self) -> Vec<Arc<Skill>> {
        self.skills
            .entries()
            .into_iter()
            .map(|(_, skill)| skill)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.skills.is_empty()
    }

    /// Fills `{{input}}`, `{{workspace}}` and `{{skill_id}}` in the template.
    pub fn render(&self, id: &str, input: &str) -> Result<String> {
        let skill = self.skills.require(id)?;
        Ok(skill
            .template
            .replace("{{input}}", input)
            .replace("{{skill_id}}", &skill.id)
            .replace("{{workspace}}", &self.workspace.to_string_lossy()))
    }
}

fn read_skill(path: &Path) -> Result<Skill> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read skill {}", path.display()))?;
    let id = path
        .parent()
        .and_then(|p| p.file_name())
        .and_then(|n| n.to_str())
        .unwrap_or("skill")
        .to_string();
    let (front, body) = split_frontmatter(&raw);

    let mut name = None;
    let mut description = None;
    for line in front.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().trim_matches('"').trim_matches('\'').to_string();
        match key.trim() {
            "name" if !value.is_empty() => name = Some(value),
            "description" if !value.is_empty() => description = Some(value),
            _ => {}
        }
    }
    let name = name
        .or_else(|| {
            body.lines()
                .find(|line| line.starts_with('#'))
                .map(|line| line.trim_start_matches('#').trim().to_string())
                .filter(|line| !line.is_empty())
        })
        .unwrap_or_else(|| id.clone());
    let description = description.unwrap_or_else(|| {
        body.lines()
            .map(str::trim)
            .find(|line| !line.is_empty() && !line.starts_with('#'))
            .unwrap_or_default()
            .to_string()
    });

    Ok(Skill {
        id,
        name,
        description,
        path: path.to_path_buf(),
        template: body.trim().to_string(),
    })
}

/// Splits a leading `---` block from the body. Without one the whole text
/// is the body.
fn split_frontmatter(raw: &str) -> (&str, &str) {
    let trimmed = raw.trim_start();
    let Some(rest) = trimmed.strip_prefix("---") else {
        return ("", raw);
    };
    match rest.find("\n---") {
        Some(end) => {
            let front = &rest[..end];
            let body = &rest[end + 4..];
            (front, body.strip_prefix('\n').unwrap_or(body))
        }
        None => ("", raw),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_skill(root: &Path, id: &str, body: &str) {
        let dir = root.join(id);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SKILL_FILE), body).unwrap();
    }

    #[test]
    fn loads_frontmatter_and_renders_placeholders() {
        let ws = tempfile::tempdir().unwrap();
        let root = runtime_dir(ws.path()).join("skills");
        write_skill(
            &root,
            "review",
            "---\nname: Code Review\ndescription: \"Review a change\"\n---\nReview {{input}} in {{workspace}} ({{skill_id}})\n",
        );

        let registry = SkillRegistry::load_from_roots(ws.path(), &[root]).unwrap();
        let skill = registry.get("review").unwrap();
        assert_eq!(skill.name, "Code Review");
        assert_eq!(skill.description, "Review a change");
        let rendered = registry.render("review", "src/lib.rs").unwrap();
        assert_eq!(
            rendered,
            format!("Review src/lib.rs in {} (review)", ws.path().display())
        );
    }

    #[test]
    fn falls_back_to_heading_and_first_line() {
        let ws = tempfile::tempdir().unwrap();
        write_skill(ws.path(), "docs", "# Write Docs\n\nDocument the module.\n");
        let registry = SkillRegistry::load_from_roots(ws.path(), &[ws.path().to_path_buf()]).unwrap();
        let skill = registry.get("docs").unwrap();
        assert_eq!(skill.name, "Write Docs");
        assert_eq!(skill.description, "Document the module.");
    }

    #[test]
    fn earlier_roots_shadow_later_ones() {
        let project = tempfile::tempdir().unwrap();
        let user = tempfile::tempdir().unwrap();
        write_skill(project.path(), "fix", "project version");
        write_skill(user.path(), "fix", "user version");
        write_skill(user.path(), "lint", "lint {{input}}");

        let registry = SkillRegistry::load_from_roots(
            project.path(),
            &[project.path().to_path_buf(), user.path().to_path_buf()],
        )
        .unwrap();
        assert_eq!(registry.ids(), vec!["fix", "lint"]);
        assert_eq!(registry.render("fix", "").unwrap(), "project version");
    }

    #[test]
    fn unknown_skill_and_missing_roots() {
        let ws = tempfile::tempdir().unwrap();
        let registry =
            SkillRegistry::load_from_roots(ws.path(), &[ws.path().join("absent")]).unwrap();
        assert!(registry.is_empty());
        let err = registry.render("nope", "x").unwrap_err();
        assert!(err.to_string().contains("skill 'nope' not found"));
    }
}
