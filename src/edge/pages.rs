//! HTML pages served by the edge

const STYLE: &str = r"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            color: white;
        }
        .container {
            text-align: center;
            padding: 2rem;
            background: rgba(255,255,255,0.1);
            border-radius: 16px;
            max-width: 400px;
        }
        h1 { margin: 0 0 0.5rem 0; }
        p { margin: 0; opacity: 0.9; }
        a.button {
            display: inline-block;
            margin-top: 1.5rem;
            padding: 0.75rem 1.5rem;
            border-radius: 8px;
            background: white;
            color: #333;
            text-decoration: none;
        }
        .detail { font-family: monospace; margin-top: 1rem; opacity: 0.7; }
        form { margin-top: 1.5rem; text-align: left; }
        label { display: block; margin: 0.75rem 0 0.25rem 0; font-size: 0.9rem; }
        input {
            box-sizing: border-box;
            width: 100%;
            padding: 0.5rem 0.75rem;
            border: none;
            border-radius: 6px;
        }
        button {
            width: 100%;
            margin-top: 1.25rem;
            padding: 0.75rem;
            border: none;
            border-radius: 8px;
            background: white;
            color: #333;
            cursor: pointer;
        }
        .notice { margin-top: 1rem; padding: 0.75rem; border-radius: 6px; font-size: 0.9rem; }
        .notice.error { background: rgba(231,76,60,0.85); }
        .notice.success { background: rgba(46,204,113,0.85); }
        .toggle { display: block; margin-top: 1rem; color: white; font-size: 0.9rem; }";

fn page(title: &str, background: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <title>{title}</title>
    <style>{STYLE}
        body {{ background: {background}; }}
    </style>
</head>
<body>
    <div class="container">
{body}
    </div>
</body>
</html>"#
    )
}

/// Escape text for inclusion in HTML
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Outcome shown above the entry form
#[derive(Debug, Clone, Copy)]
pub(super) enum Notice<'a> {
    Error(&'a str),
    Success(&'a str),
}

/// Entry page: email/password form posting back to `action`, in sign-in or sign-up mode
pub(super) fn entry_page(action: &str, sign_up: bool, email: &str, notice: Option<Notice<'_>>) -> String {
    let (heading, mode, submit, toggle_href, toggle_text) = if sign_up {
        (
            "Create Account",
            "signup",
            "Create Account",
            action.to_string(),
            "Already have an account? Sign in",
        )
    } else {
        (
            "Sign In",
            "signin",
            "Sign In",
            format!("{action}?mode=signup"),
            "Don't have an account? Sign up",
        )
    };

    let notice = match notice {
        Some(Notice::Error(message)) => {
            format!("\n        <div class=\"notice error\">{}</div>", escape(message))
        }
        Some(Notice::Success(message)) => {
            format!("\n        <div class=\"notice success\">{}</div>", escape(message))
        }
        None => String::new(),
    };

    let action = escape(action);
    let email = escape(email);
    let toggle_href = escape(&toggle_href);
    let toggle_text = escape(toggle_text);
    page(
        heading,
        "linear-gradient(135deg, #667eea 0%, #764ba2 100%)",
        &format!(
            r#"        <h1>{heading}</h1>
        <form method="post" action="{action}">
            <input type="hidden" name="mode" value="{mode}">
            <label for="email">Email</label>
            <input id="email" type="email" name="email" value="{email}" required>
            <label for="password">Password</label>
            <input id="password" type="password" name="password" minlength="6" required>{notice}
            <button type="submit">{submit}</button>
        </form>
        <a class="toggle" href="{toggle_href}">{toggle_text}</a>"#
        ),
    )
}

/// Shown on the callback path while no code has been processed
pub(super) fn processing_page() -> String {
    page(
        "Signing in",
        "linear-gradient(135deg, #667eea 0%, #764ba2 100%)",
        "        <h1>Processing authentication...</h1>",
    )
}

/// Shown when the code exchange failed
pub(super) fn error_page(message: &str, entry_path: &str) -> String {
    page(
        "Authentication Failed",
        "linear-gradient(135deg, #e74c3c 0%, #c0392b 100%)",
        &format!(
            "        <h1>Authentication Failed</h1>\n        <p class=\"detail\">{}</p>\n        <a class=\"button\" href=\"{}\">Try again</a>",
            escape(message),
            escape(entry_path)
        ),
    )
}

/// Shown for gated pages when no upstream application is configured
pub(super) fn placeholder_page(path: &str) -> String {
    page(
        "Signed in",
        "linear-gradient(135deg, #11998e 0%, #38ef7d 100%)",
        &format!(
            "        <h1>Signed in</h1>\n        <p>No upstream application is configured.</p>\n        <p class=\"detail\">{}</p>",
            escape(path)
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_page_escapes_message() {
        let html = error_page("<script>alert(1)</script>", "/auth");
        assert!(!html.contains("<script>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(html.contains(r#"href="/auth""#));
    }

    #[test]
    fn test_entry_page_sign_in_form() {
        let html = entry_page("/auth", false, "", None);
        assert!(html.contains(r#"<form method="post" action="/auth">"#));
        assert!(html.contains(r#"name="mode" value="signin""#));
        assert!(html.contains(r#"minlength="6""#));
        assert!(html.contains(r#"href="/auth?mode=signup""#));
        assert!(!html.contains(r#"class="notice"#));
    }

    #[test]
    fn test_entry_page_sign_up_with_notices() {
        let html = entry_page("/auth", true, "a\"b@example.com", Some(Notice::Success("Check your email")));
        assert!(html.contains(r#"name="mode" value="signup""#));
        assert!(html.contains("Create Account"));
        assert!(html.contains(r#"value="a&quot;b@example.com""#));
        assert!(html.contains(r#"<div class="notice success">Check your email</div>"#));

        let html = entry_page("/auth", false, "", Some(Notice::Error("<b>bad</b>")));
        assert!(html.contains(r#"<div class="notice error">&lt;b&gt;bad&lt;/b&gt;</div>"#));
    }
}
