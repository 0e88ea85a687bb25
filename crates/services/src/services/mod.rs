pub mod git_host;
pub mod prereq;
pub mod project;
pub mod publish;
pub mod repo;
pub mod transcript;
