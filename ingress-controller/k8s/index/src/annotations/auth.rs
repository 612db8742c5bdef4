use super::parser::{AnnotatedResource, ParseError, Parser};
use mci_ingress_controller_core::{annotations::auth::Config, ResourceStore};
use mci_ingress_controller_k8s_api::Secret;
use std::{fmt::Write, path::Path};

const FILE_AUTH: &str = "auth-file";
const MAP_AUTH: &str = "auth-map";

/// Reads the basic/digest auth annotations, rendering the referenced secret as
/// the contents of an htpasswd file under `directory`. The file itself is
/// written by whoever checks the configuration.
///
/// Every failure past the `auth-type` annotation denies the location.
pub(super) fn parse<R, S>(
    p: &Parser<'_>,
    resource: &R,
    store: &S,
    directory: &Path,
) -> Result<Config, ParseError>
where
    R: AnnotatedResource,
    S: ResourceStore + ?Sized,
{
    let auth_type = p.string("auth-type")?;
    if auth_type != "basic" && auth_type != "digest" {
        return Err(ParseError::LocationDenied(
            "invalid authentication type".to_string(),
        ));
    }

    let secret_type = p.string_or("auth-secret-type", FILE_AUTH);

    let secret_ref = p.string("auth-secret").map_err(|error| {
        ParseError::LocationDenied(format!(
            "error reading secret name from annotation: {error}"
        ))
    })?;
    let meta = resource.object_meta();
    let namespace = meta.namespace.as_deref().unwrap_or_default();
    let key = match secret_ref.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.contains('/') => format!("{ns}/{name}"),
        Some(("", name)) if !name.contains('/') => format!("{namespace}/{name}"),
        None => format!("{namespace}/{secret_ref}"),
        Some(_) => {
            return Err(ParseError::LocationDenied(format!(
                "error reading secret name from annotation: unexpected key format {secret_ref:?}"
            )))
        }
    };
    let secret = store.get_secret(&key).map_err(|error| {
        ParseError::LocationDenied(format!("unexpected error reading secret {key}: {error}"))
    })?;

    let realm = p.string_or("auth-realm", "");

    let file = directory.join(format!(
        "{}-{}-{}.passwd",
        namespace,
        meta.uid.as_deref().unwrap_or_default(),
        secret.metadata.uid.as_deref().unwrap_or_default(),
    ));
    let contents = match secret_type.as_str() {
        FILE_AUTH => auth_file(&secret)?,
        MAP_AUTH => auth_map(&secret),
        _ => {
            return Err(ParseError::LocationDenied(
                "invalid auth-secret-type in annotation, must be 'auth-file' or 'auth-map'"
                    .to_string(),
            ))
        }
    };
    Ok(Config {
        auth_type,
        realm,
        file: file.display().to_string(),
        secured: true,
        secret: key,
        secret_type,
        contents,
    })
}

fn auth_file(secret: &Secret) -> Result<Vec<u8>, ParseError> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get("auth"))
        .map(|v| v.0.clone())
        .ok_or_else(|| {
            ParseError::LocationDenied(format!(
                "the secret {} does not contain a key with value auth",
                secret.metadata.name.as_deref().unwrap_or_default()
            ))
        })
}

/// Writes one `user:password` line per secret key.
fn auth_map(secret: &Secret) -> Vec<u8> {
    let mut out = String::new();
    for (user, pass) in secret.data.iter().flatten() {
        let _ = writeln!(out, "{}:{}", user, String::from_utf8_lossy(&pass.0));
    }
    out.into_bytes()
}
