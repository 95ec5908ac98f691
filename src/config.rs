use std::path::PathBuf;

/// Directory holding the model artifacts. Defaults to the working directory.
pub const MODEL_DIR_ENV: &str = "AGRI_MODEL_DIR";

#[derive(Debug, Clone, PartialEq)]
pub struct Config
{
    pub model_dir: PathBuf,
}

impl Default for Config
{
    fn default() -> Self
    {
        Self { model_dir: PathBuf::from(".") }
    }
}

impl Config
{
    pub fn from_env() -> Self
    {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self
    {
        match lookup(MODEL_DIR_ENV).filter(|dir| !dir.trim().is_empty())
        {
            Some(dir) => Self { model_dir: PathBuf::from(dir) },
            None => Self::default(),
        }
    }
}
