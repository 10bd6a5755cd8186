// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Sandboxed in-memory filesystem backing the PJL FS* commands.
//
// Every session gets its own tree, built from a fixed layout that mirrors the
// volume of a real HP LaserJet (`0:\PJL`, `0:\webServer\...`).  Nothing here
// ever touches the host filesystem and nothing a client sends can change the
// tree: FSMKDIR and FSUPLOAD are acknowledged by the dispatcher but never
// applied.
//
// # Path handling
//
// Paths are split on both `/` and `\`.  `.` is ignored and `..` walks up one
// level.  A `..` that would climb above the root makes the whole path
// unresolvable, so traversal attempts fall into the caller's "not found"
// branch instead of being clamped onto some other directory.

// ---------------------------------------------------------------------------
// Bootstrap layout
// ---------------------------------------------------------------------------

/// Directories present on every fresh volume.
const BOOTSTRAP_DIRS: &[&str] = &[
    "/PJL",
    "/PostScript",
    "/saveDevice/SavedJobs/InProgress",
    "/saveDevice/SavedJobs/KeepJob",
    "/webServer/default",
    "/webServer/home",
    "/webServer/lib",
    "/webServer/objects",
    "/webServer/permanent",
];

/// Placeholder files present on every fresh volume.
const BOOTSTRAP_FILES: &[&str] = &[
    "/webServer/default/csconfig",
    "/webServer/home/device.html",
    "/webServer/home/hostmanifest",
    "/webServer/lib/keys",
    "/webServer/lib/security",
];

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Whether a node is a file or a directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    File,
    Directory,
}

/// A directory entry as reported to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub name: String,
    pub kind: NodeKind,
    /// Size in bytes.  Always 0 for directories.
    pub size: u64,
}

/// Result of resolving a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    File { size: u64 },
    Directory,
    NotFound,
}

// ---------------------------------------------------------------------------
// Tree
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Tree {
    File { size: u64 },
    /// Children are kept in insertion order, which is the order FSDIRLIST
    /// reports them in.
    Directory { children: Vec<(String, Tree)> },
}

impl Tree {
    fn empty_dir() -> Self {
        Tree::Directory {
            children: Vec::new(),
        }
    }

    fn child(&self, name: &str) -> Option<&Tree> {
        match self {
            Tree::Directory { children } => children
                .iter()
                .find(|(child, _)| child == name)
                .map(|(_, node)| node),
            Tree::File { .. } => None,
        }
    }

    /// Return the named child directory, creating it if missing.  `None` if a
    /// file is in the way or `self` is not a directory.
    fn child_dir_mut(&mut self, name: &str) -> Option<&mut Tree> {
        let Tree::Directory { children } = self else {
            return None;
        };
        let idx = match children.iter().position(|(child, _)| child == name) {
            Some(idx) => idx,
            None => {
                children.push((name.to_string(), Tree::empty_dir()));
                children.len() - 1
            }
        };
        match &mut children[idx].1 {
            dir @ Tree::Directory { .. } => Some(dir),
            Tree::File { .. } => None,
        }
    }
}

/// Split `path` into its components relative to the sandbox root.
///
/// Returns `None` when a `..` would leave the root.
pub fn normalize(path: &str) -> Option<Vec<&str>> {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split(['/', '\\']) {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            name => parts.push(name),
        }
    }
    Some(parts)
}

/// Extract the path portion of a PJL volume name such as `"0:\PJL"`.
///
/// Quotes are stripped and everything up to and including the first `:` is
/// dropped.  Returns `None` if there is no volume separator.
pub fn resolve_device_path(name: &str) -> Option<String> {
    let unquoted = name.replace('"', "");
    unquoted
        .split_once(':')
        .map(|(_volume, path)| path.to_string())
}

// ---------------------------------------------------------------------------
// VirtualFilesystem
// ---------------------------------------------------------------------------

/// Per-session emulated printer volume.
#[derive(Debug, Clone)]
pub struct VirtualFilesystem {
    root: Tree,
}

impl Default for VirtualFilesystem {
    fn default() -> Self {
        Self::bootstrap()
    }
}

impl VirtualFilesystem {
    /// A volume containing nothing but the root directory.
    pub fn empty() -> Self {
        Self {
            root: Tree::empty_dir(),
        }
    }

    /// A volume with the standard printer layout.
    pub fn bootstrap() -> Self {
        let mut fs = Self::empty();
        for dir in BOOTSTRAP_DIRS {
            fs.create_dir_all(dir);
        }
        for file in BOOTSTRAP_FILES {
            fs.create_file(file, 0);
        }
        fs
    }

    /// Whether `path` names an existing file or directory.
    pub fn exists(&self, path: &str) -> bool {
        self.find(path).is_some()
    }

    /// Resolve `path` to the kind of node it names.
    pub fn lookup(&self, path: &str) -> Lookup {
        match self.find(path) {
            Some(Tree::File { size }) => Lookup::File { size: *size },
            Some(Tree::Directory { .. }) => Lookup::Directory,
            None => Lookup::NotFound,
        }
    }

    /// Children of the directory at `path`, in insertion order.  Empty when
    /// `path` is a file or does not resolve.
    pub fn list_children(&self, path: &str) -> Vec<Node> {
        match self.find(path) {
            Some(Tree::Directory { children }) => children
                .iter()
                .map(|(name, node)| match node {
                    Tree::File { size } => Node {
                        name: name.clone(),
                        kind: NodeKind::File,
                        size: *size,
                    },
                    Tree::Directory { .. } => Node {
                        name: name.clone(),
                        kind: NodeKind::Directory,
                        size: 0,
                    },
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn find(&self, path: &str) -> Option<&Tree> {
        let parts = normalize(path)?;
        let mut node = &self.root;
        for part in parts {
            node = node.child(part)?;
        }
        Some(node)
    }

    // Layout construction is only ever driven by the constant tables above.

    fn create_dir_all(&mut self, path: &str) -> Option<&mut Tree> {
        let parts = normalize(path)?;
        let mut node = &mut self.root;
        for part in parts {
            node = node.child_dir_mut(part)?;
        }
        Some(node)
    }

    fn create_file(&mut self, path: &str, size: u64) {
        let Some(parts) = normalize(path) else {
            return;
        };
        let Some((name, parents)) = parts.split_last() else {
            return;
        };
        let parent_path = parents.join("/");
        if let Some(Tree::Directory { children }) = self.create_dir_all(&parent_path) {
            if !children.iter().any(|(child, _)| child == name) {
                children.push((name.to_string(), Tree::File { size }));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
