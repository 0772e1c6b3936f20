//! icd-cli: command line front-end for the ICD model factory.
//!
//! Configuration comes from a JSON file ([`input::RunConfig`]) with command
//! line overrides; the subcommands build a model, print the run parameters
//! or emit description vectors for zero-shot labels.
pub mod commands;
pub mod input;
