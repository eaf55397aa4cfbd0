//! Configuration template rendering.
//!
//! Built-in templates for each managed service are compiled into the
//! binary. A template of the same name under the configured templates
//! directory overrides the built-in one.

mod engine;
mod filters;

pub use engine::TemplateEngine;

/// Template names and sources compiled into the daemon.
pub const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    (
        "smb/smb.conf.tera",
        include_str!("../../templates/smb/smb.conf.tera"),
    ),
    (
        "nfs/exports.tera",
        include_str!("../../templates/nfs/exports.tera"),
    ),
    (
        "ftp/vsftpd.conf.tera",
        include_str!("../../templates/ftp/vsftpd.conf.tera"),
    ),
];
