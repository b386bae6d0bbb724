use serde::{Deserialize, Serialize};

use crate::types::{FileDescriptor, file_extension};

const DEFAULT_MAX_FILE_SIZE_MB: u64 = 100;
const DEFAULT_MAX_FILES: usize = 10;

/// Limits applied to a batch of selected files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationConstraints {
    /// `.ext` patterns or MIME globs (`image/*`). Empty accepts everything.
    #[serde(default)]
    pub accepted_types: Vec<String>,
    #[serde(rename = "maxFileSizeMB", default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_max_file_size_mb() -> u64 {
    DEFAULT_MAX_FILE_SIZE_MB
}

fn default_max_files() -> usize {
    DEFAULT_MAX_FILES
}

impl Default for ValidationConstraints {
    fn default() -> Self {
        Self {
            accepted_types: Vec::new(),
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
            max_files: DEFAULT_MAX_FILES,
        }
    }
}

impl ValidationConstraints {
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_file_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Why a file (or group of files) was turned away.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{name}: File type \"{extension}\" is not allowed")]
    TypeNotAllowed { name: String, extension: String },

    #[error("{name}: File size exceeds {limit_mb}MB limit")]
    TooLarge { name: String, limit_mb: u64 },

    #[error("Too many files. Maximum {max} files allowed.")]
    TooManyFiles { max: usize },
}

/// Files rejected for one reason.
#[derive(Debug, Clone)]
pub struct Rejection {
    pub files: Vec<FileDescriptor>,
    pub reason: ValidationError,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<FileDescriptor>,
    pub rejected: Vec<Rejection>,
}

impl ValidationOutcome {
    /// Number of rejected files, counting each file of a batch rejection.
    pub fn rejected_files(&self) -> usize {
        self.rejected.iter().map(|r| r.files.len()).sum()
    }

    /// Human-readable reasons, one per rejection.
    pub fn messages(&self) -> Vec<String> {
        self.rejected.iter().map(|r| r.reason.to_string()).collect()
    }
}

/// Filters a selection against [`ValidationConstraints`].
#[derive(Debug, Clone, Default)]
pub struct FileValidator {
    constraints: ValidationConstraints,
}

impl FileValidator {
    pub fn new(constraints: ValidationConstraints) -> Self {
        Self { constraints }
    }

    pub fn constraints(&self) -> &ValidationConstraints {
        &self.constraints
    }

    /// Splits `files` into accepted and rejected, preserving input order.
    ///
    /// Type is checked before size. Files surviving both checks beyond
    /// `max_files` are rejected together under one batch reason.
    pub fn validate(&self, files: Vec<FileDescriptor>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();

        for file in files {
            match self.check_file(&file) {
                Ok(()) => outcome.accepted.push(file),
                Err(reason) => outcome.rejected.push(Rejection {
                    files: vec![file],
                    reason,
                }),
            }
        }

        let max = self.constraints.max_files;
        if outcome.accepted.len() > max {
            let overflow = outcome.accepted.split_off(max);
            outcome.rejected.push(Rejection {
                files: overflow,
                reason: ValidationError::TooManyFiles { max },
            });
        }

        outcome
    }

    fn check_file(&self, file: &FileDescriptor) -> Result<(), ValidationError> {
        if !self.type_allowed(file) {
            return Err(ValidationError::TypeNotAllowed {
                name: file.name.clone(),
                extension: file.extension(),
            });
        }
        if file.size > self.constraints.max_file_size_bytes() {
            return Err(ValidationError::TooLarge {
                name: file.name.clone(),
                limit_mb: self.constraints.max_file_size_mb,
            });
        }
        Ok(())
    }

    fn type_allowed(&self, file: &FileDescriptor) -> bool {
        let accepted = &self.constraints.accepted_types;
        if accepted.is_empty() {
            return true;
        }
        let ext = file_extension(&file.name);
        let mime = file.mime_type.to_lowercase();
        accepted.iter().any(|pattern| {
            if let Some(want) = pattern.strip_prefix('.') {
                want.to_lowercase() == ext
            } else if pattern.contains('/') {
                glob_match(&pattern.to_lowercase(), &mime)
            } else {
                false
            }
        })
    }
}

/// Shorthand for `FileValidator::new(constraints.clone()).validate(files)`.
pub fn validate(files: Vec<FileDescriptor>, constraints: &ValidationConstraints) -> ValidationOutcome {
    FileValidator::new(constraints.clone()).validate(files)
}

/// Anchored glob match where `*` matches any run of characters.
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((sp, st)) = star {
            pi = sp + 1;
            ti = st + 1;
            star = Some((sp, st + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|&c| c == '*')
}
