//! In-memory remote tree answering the pinned listing commands

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::listing::{join_path, normalize_path};
use crate::app::shell::RemoteShell;
use crate::constants::listing;
use crate::errors::{ShellError, ShellResult};

#[derive(Debug, Clone)]
struct Node {
    dir: bool,
    size: u64,
    modified_secs: i64,
}

#[derive(Default)]
struct TreeState {
    nodes: BTreeMap<String, Node>,
    responses: Vec<(String, String)>,
    log: Vec<String>,
}

/// Cloneable in-memory filesystem implementing [`RemoteShell`]
#[derive(Clone, Default)]
pub struct FakeTree {
    state: Arc<Mutex<TreeState>>,
}

impl FakeTree {
    pub fn new() -> Self {
        let tree = Self::default();
        tree.with(|s| {
            s.nodes.insert(
                "/".to_string(),
                Node {
                    dir: true,
                    size: 4096,
                    modified_secs: 0,
                },
            )
        });
        tree
    }

    /// Add a directory and any missing parents
    pub fn dir(&self, path: &str) -> &Self {
        self.insert(path, true, 4096, 0);
        self
    }

    /// Add a file with the given size and epoch-seconds mtime
    pub fn file(&self, path: &str, size: u64, modified_secs: i64) -> &Self {
        self.insert(path, false, size, modified_secs);
        self
    }

    /// Canned output for commands starting with `prefix`
    pub fn respond(&self, prefix: &str, output: &str) -> &Self {
        self.with(|s| s.responses.push((prefix.to_string(), output.to_string())));
        self
    }

    /// Every command received so far
    pub fn commands(&self) -> Vec<String> {
        self.with(|s| s.log.clone())
    }

    /// Number of single-directory listings received so far
    pub fn directory_listings(&self) -> usize {
        let prefix = format!("{} ", listing::LIST_DIR);
        self.with(|s| s.log.iter().filter(|c| c.starts_with(&prefix)).count())
    }

    fn insert(&self, path: &str, dir: bool, size: u64, modified_secs: i64) {
        let path = normalize_path(path);
        self.with(|s| {
            let mut parent = path.as_str();
            while let Some(idx) = parent.rfind('/') {
                parent = if idx == 0 { "/" } else { &parent[..idx] };
                s.nodes.entry(parent.to_string()).or_insert(Node {
                    dir: true,
                    size: 4096,
                    modified_secs: 0,
                });
                if parent == "/" {
                    break;
                }
            }
            s.nodes.insert(
                path.clone(),
                Node {
                    dir,
                    size,
                    modified_secs,
                },
            );
        });
    }

    fn with<T>(&self, f: impl FnOnce(&mut TreeState) -> T) -> T {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl TreeState {
    fn children(&self, dir: &str) -> Vec<(String, Node)> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(path, _)| path.starts_with(&prefix))
            .filter(|(path, _)| path.len() > prefix.len() && !path[prefix.len()..].contains('/'))
            .map(|(path, node)| (path[prefix.len()..].to_string(), node.clone()))
            .collect()
    }

    fn missing(path: &str) -> ShellError {
        ShellError::Command {
            message: format!("ls: cannot access '{}': No such file or directory", path),
        }
    }

    fn list_dir(&self, path: &str) -> ShellResult<String> {
        let node = self.nodes.get(path).ok_or_else(|| Self::missing(path))?;
        if !node.dir {
            return Ok(row(node, path));
        }
        let children = self.children(path);
        let mut out = format!("total {}\r\n", children.len() * 4);
        for (name, node) in &children {
            out.push_str(&row(node, name));
        }
        Ok(out)
    }

    fn list_recursive(&self, path: &str, exclude: Option<&str>) -> ShellResult<String> {
        if !self.nodes.contains_key(path) {
            return Err(Self::missing(path));
        }
        let mut out = String::new();
        let mut pending = vec![path.to_string()];
        while let Some(dir) = pending.pop() {
            if !out.is_empty() {
                out.push_str("\r\n");
            }
            out.push_str(&format!("{}:\r\n", dir));
            let children: Vec<(String, Node)> = self
                .children(&dir)
                .into_iter()
                .filter(|(name, _)| Some(name.as_str()) != exclude)
                .collect();
            out.push_str(&format!("total {}\r\n", children.len() * 4));
            for (name, node) in &children {
                out.push_str(&row(node, name));
            }
            let mut subdirs: Vec<String> = children
                .iter()
                .filter(|(_, node)| node.dir)
                .map(|(name, _)| join_path(&dir, name))
                .collect();
            subdirs.reverse();
            pending.extend(subdirs);
        }
        Ok(out)
    }
}

fn row(node: &Node, name: &str) -> String {
    let perms = if node.dir { "drwxr-xr-x" } else { "-rw-r--r--" };
    format!(
        "{} 1 app app {} {} {}\r\n",
        perms, node.size, node.modified_secs, name
    )
}

fn unquote(arg: &str) -> String {
    let arg = arg.trim();
    let inner = arg
        .strip_prefix('\'')
        .and_then(|a| a.strip_suffix('\''))
        .unwrap_or(arg);
    inner.replace("'\\''", "'")
}

impl RemoteShell for FakeTree {
    fn execute(&mut self, command: &str, _check_errors: bool) -> ShellResult<String> {
        self.with(|s| {
            s.log.push(command.to_string());

            if let Some(rest) = command.strip_prefix(&format!("{} ", listing::LIST_RECURSIVE)) {
                let (exclude, target) = match rest.strip_prefix("-I ") {
                    Some(rest) => {
                        let end = rest[1..].find('\'').map_or(rest.len(), |i| i + 2);
                        (Some(unquote(&rest[..end])), unquote(&rest[end..]))
                    }
                    None => (None, unquote(rest)),
                };
                return s.list_recursive(&normalize_path(&target), exclude.as_deref());
            }
            if let Some(rest) = command.strip_prefix(&format!("{} ", listing::LIST_PATH)) {
                let target = normalize_path(&unquote(rest));
                let node = s.nodes.get(&target).ok_or_else(|| TreeState::missing(&target))?;
                return Ok(row(node, &target));
            }
            if let Some(rest) = command.strip_prefix(&format!("{} ", listing::LIST_DIR)) {
                return s.list_dir(&normalize_path(&unquote(rest)));
            }
            if let Some((_, output)) = s
                .responses
                .iter()
                .find(|(prefix, _)| command.starts_with(prefix.as_str()))
            {
                return Ok(output.clone());
            }
            Err(ShellError::Command {
                message: format!("bash: {}: command not found", command),
            })
        })
    }
}
