use anyhow::bail;
use regex::Regex;
use serde_yaml::Value;
use std::sync::LazyLock;

static ENV_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}").expect("Invalid env reference pattern")
});

/// Replaces `${VAR}` and `${VAR:-default}` in every string of a YAML tree.
///
/// Template placeholders (`{{ name }}`) are left untouched; they are rendered
/// per request, not at load time.
pub fn interpolate<F>(value: &mut Value, lookup: &F) -> anyhow::Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    match value {
        Value::String(s) => {
            if s.contains("${") {
                *s = interpolate_str(s, lookup)?;
            }
        }
        Value::Sequence(items) => {
            for item in items {
                interpolate(item, lookup)?;
            }
        }
        Value::Mapping(map) => {
            for (_, item) in map.iter_mut() {
                interpolate(item, lookup)?;
            }
        }
        Value::Tagged(tagged) => interpolate(&mut tagged.value, lookup)?,
        _ => {}
    }
    Ok(())
}

pub fn interpolate_str<F>(input: &str, lookup: &F) -> anyhow::Result<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(input.len());
    let mut last = 0;

    for captures in ENV_REF.captures_iter(input) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        out.push_str(&input[last..whole.start()]);

        let value = match (lookup(name.as_str()), captures.get(2)) {
            (Some(value), _) => value,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => bail!("Environment variable '{}' is not set", name.as_str()),
        };
        out.push_str(&value);
        last = whole.end();
    }

    out.push_str(&input[last..]);
    Ok(out)
}
