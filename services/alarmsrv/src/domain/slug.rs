//! Slug generation for alarm names

/// Lowercase, ASCII alphanumerics kept, runs of anything else collapsed to `-`
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else if c == '_' {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push('_');
        } else {
            pending_dash = true;
        }
    }

    slug
}

/// First free slug among `base`, `base-1`, `base-2`, ...
pub fn unique_slug<F>(name: &str, taken: F) -> String
where
    F: Fn(&str) -> bool,
{
    let base = slugify(name);
    if !taken(&base) {
        return base;
    }

    let mut n = 1u32;
    loop {
        let candidate = format!("{}-{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}
