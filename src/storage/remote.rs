//! Fetch and push against a named remote.
//!
//! Fetch takes refspecs verbatim, wildcards included. libgit2 cannot push a
//! wildcard refspec, so [`push_matching`] expands `src/*:dst/*` against the
//! local refs first and pushes each match explicitly.

use std::cell::RefCell;

use git2::{Cred, FetchOptions, PushOptions, RemoteCallbacks, Repository};
use tracing::{debug, info};

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::refs::RefManager;

fn callbacks<'cb>(repo: &Repository) -> RemoteCallbacks<'cb> {
    let cfg = repo.config().ok();
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(move |url, username_from_url, allowed| {
        if allowed.is_ssh_key() {
            if let Some(user) = username_from_url {
                return Cred::ssh_key_from_agent(user);
            }
        }
        if allowed.is_user_pass_plaintext() {
            if let Some(ref cfg) = cfg {
                if let Ok(cred) = Cred::credential_helper(cfg, url, username_from_url) {
                    return Ok(cred);
                }
            }
        }
        Cred::default()
    });
    callbacks
}

fn find_remote<'r>(repo: &'r Repository, remote_name: &str) -> StorageResult<git2::Remote<'r>> {
    repo.find_remote(remote_name).map_err(|e| {
        if e.code() == git2::ErrorCode::NotFound {
            StorageError::RemoteNotFound(remote_name.to_string())
        } else {
            StorageError::Git(e)
        }
    })
}

/// fetch `refspecs` from the remote into local refs
pub fn fetch(repo: &Repository, remote_name: &str, refspecs: &[&str]) -> StorageResult<()> {
    let mut remote = find_remote(repo, remote_name)?;

    let mut fo = FetchOptions::new();
    fo.remote_callbacks(callbacks(repo));
    remote.fetch(refspecs, Some(&mut fo), None)?;

    debug!(remote = remote_name, ?refspecs, "fetched");
    Ok(())
}

/// push explicit `src:dst` refspecs to the remote
///
/// a ref the remote refuses (typically non-fast-forward) is reported as
/// [`StorageError::PushRejected`]
pub fn push(repo: &Repository, remote_name: &str, refspecs: &[String]) -> StorageResult<()> {
    if refspecs.is_empty() {
        return Ok(());
    }
    let mut remote = find_remote(repo, remote_name)?;

    // (ref, message) of the first ref the remote refused
    let rejected: RefCell<Option<(String, String)>> = RefCell::new(None);
    {
        let mut callbacks = callbacks(repo);
        callbacks.push_update_reference(|ref_name, status| {
            if let Some(msg) = status {
                rejected
                    .borrow_mut()
                    .get_or_insert_with(|| (ref_name.to_string(), msg.to_string()));
            }
            Ok(())
        });

        let mut push_options = PushOptions::new();
        push_options.remote_callbacks(callbacks);

        if let Err(e) = remote.push(refspecs, Some(&mut push_options)) {
            let msg = e.message().to_string();
            if e.code() == git2::ErrorCode::NotFastForward
                || msg.contains("non-fast-forward")
                || msg.contains("fetch first")
            {
                return Err(StorageError::PushRejected {
                    reference: refspecs.join(" "),
                    message: msg,
                });
            }
            return Err(StorageError::Git(e));
        }
    }

    if let Some((reference, message)) = rejected.into_inner() {
        return Err(StorageError::PushRejected { reference, message });
    }

    info!(remote = remote_name, refs = refspecs.len(), "pushed");
    Ok(())
}

/// push every local ref matched by a single-wildcard refspec `src/*:dst/*`
///
/// a leading `+` is carried over to each expanded refspec
pub fn push_matching(repo: &Repository, remote_name: &str, refspec: &str) -> StorageResult<()> {
    let expanded = expand_refspec(repo, refspec)?;
    push(repo, remote_name, &expanded)
}

fn expand_refspec(repo: &Repository, refspec: &str) -> StorageResult<Vec<String>> {
    let (force, spec) = match refspec.strip_prefix('+') {
        Some(rest) => ("+", rest),
        None => ("", refspec),
    };
    let (src, dst) = spec
        .split_once(':')
        .ok_or_else(|| StorageError::Internal(format!("refspec without destination: {}", refspec)))?;

    let (src_prefix, dst_prefix) = match (src.strip_suffix('*'), dst.strip_suffix('*')) {
        (Some(s), Some(d)) => (s, d),
        (None, None) => return Ok(vec![refspec.to_string()]),
        _ => {
            return Err(StorageError::Internal(format!(
                "refspec wildcard must appear on both sides: {}",
                refspec
            )))
        }
    };

    let expanded = RefManager::list_refs(repo, src)?
        .into_iter()
        .filter_map(|name| {
            let rest = name.as_str().strip_prefix(src_prefix)?;
            Some(format!("{}{}:{}{}", force, name, dst_prefix, rest))
        })
        .collect();
    Ok(expanded)
}
