use crate::compose::EffectiveConfig;
use crate::error::{Error, Result};
use crate::value::ConfigValue;

/// Renders a script template against one effective configuration.
///
/// Placeholders are `{{ section.key }}` with an optional join filter for
/// list values: `{{ run.modules | lines }}` or `{{ run.tags | csv }}`.
/// Multiplicity is declared by the template, never inferred: a list value
/// without a filter is an error, as is a filter on a scalar. Deterministic
/// by construction; identical inputs render byte-identical output.
pub fn render(config: &EffectiveConfig, template: &str) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let end = after.find("}}").ok_or_else(|| Error::Template {
            reason: "unterminated '{{' placeholder".to_string(),
        })?;
        let inner = after[..end].trim();
        out.push_str(&substitute(config, inner)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn substitute(config: &EffectiveConfig, inner: &str) -> Result<String> {
    let (path, filter) = match inner.split_once('|') {
        Some((p, f)) => (p.trim(), Some(f.trim())),
        None => (inner, None),
    };
    if path.is_empty() {
        return Err(Error::Template {
            reason: "empty placeholder".to_string(),
        });
    }
    let value = config
        .get_path(path)
        .ok_or_else(|| Error::UnresolvedPlaceholder {
            placeholder: inner.to_string(),
        })?;
    match (value, filter) {
        (ConfigValue::List(items), Some(filter)) => {
            let sep = match filter {
                "csv" => ",",
                "lines" => "\n",
                other => {
                    return Err(Error::Template {
                        reason: format!("unknown filter '{}' on '{}'", other, path),
                    })
                }
            };
            let parts: Vec<String> = items
                .iter()
                .map(|item| {
                    item.as_text().ok_or_else(|| Error::Template {
                        reason: format!("non-scalar list element at '{}'", path),
                    })
                })
                .collect::<Result<_>>()?;
            Ok(parts.join(sep))
        }
        (ConfigValue::List(_), None) => Err(Error::Template {
            reason: format!("list value at '{}' requires a join filter (csv|lines)", path),
        }),
        (scalar, None) => Ok(scalar.as_text().expect("scalar has text form")),
        (_, Some(filter)) => Err(Error::Template {
            reason: format!("filter '{}' applied to scalar '{}'", filter, path),
        }),
    }
}
