use crate::types::Identity;
use axum::http::StatusCode;

const STYLE: &str = r#"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            text-align: center;
            margin-top: 50px;
            background-color: #f5f5f5;
        }
        .container {
            display: inline-block;
            background: white;
            padding: 2rem;
            border-radius: 8px;
            box-shadow: 0 2px 4px rgba(0,0,0,0.1);
            max-width: 500px;
        }
        .button {
            display: inline-block;
            padding: 10px 20px;
            font-size: 1.2em;
            color: white;
            background-color: #7289DA;
            border-radius: 5px;
            text-decoration: none;
        }
        .button:hover {
            background-color: #677BC4;
        }
        .message {
            margin-top: 20px;
            font-size: 1.1em;
        }
        .status {
            color: #718096;
            font-size: 0.9rem;
            margin-top: 1.5rem;
        }
"#;

pub fn index_page(identity: Option<&Identity>) -> String {
    let body = match identity {
        Some(Identity::Email(email)) => format!(
            r#"<p class="message" data-session="email">Hello, <strong>{}</strong>!</p>
        <p><a href="/logout" class="button">Log out</a></p>"#,
            escape_html(email)
        ),
        Some(identity @ Identity::NoEmail) => format!(
            r#"<p class="message" data-session="no-email">Signed in with Discord ({}).</p>
        <p><a href="/logout" class="button">Log out</a></p>"#,
            escape_html(identity.as_str())
        ),
        None => r#"<p class="message" data-session="anonymous">Sign in with your Discord account to share your email address.</p>
        <p><a href="/login" class="button">Log in with Discord</a></p>"#
            .to_string(),
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Discord Email Sign-in</title>
    <style>{style}</style>
</head>
<body>
    <div class="container">
        <h1>Discord Email Sign-in</h1>
        {body}
        <p class="status">Bot: <span id="gateway-status">checking...</span></p>
    </div>
    <script>
        async function refreshStatus() {{
            try {{
                const response = await fetch('/status');
                const data = await response.json();
                document.getElementById('gateway-status').textContent = data.status;
            }} catch (error) {{
                document.getElementById('gateway-status').textContent = 'unknown';
            }}
        }}
        refreshStatus();
        setInterval(refreshStatus, 5000);
    </script>
</body>
</html>
"#,
        style = STYLE,
        body = body
    )
}

pub fn error_page(status: StatusCode, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>{code} Error</title>
    <style>{style}</style>
</head>
<body>
    <div class="container">
        <h1>Sign-in failed</h1>
        <p class="message">{message}</p>
        <p><a href="/">Back</a></p>
    </div>
</body>
</html>
"#,
        code = status.as_u16(),
        style = STYLE,
        message = escape_html(message)
    )
}

pub fn escape_html(input: &str) -> String {
    let mut escaped = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#x27;&amp;&#x27;&lt;/a&gt;"
        );
    }

    #[test]
    fn three_session_states_render_differently() {
        let with_email = index_page(Some(&Identity::Email("a@b.com".into())));
        let without_email = index_page(Some(&Identity::NoEmail));
        let anonymous = index_page(None);

        assert!(with_email.contains("a@b.com"));
        assert!(with_email.contains("/logout"));

        assert!(without_email.contains("no email available"));
        assert!(without_email.contains("/logout"));
        assert!(!without_email.contains("/login"));

        assert!(anonymous.contains("/login"));
        assert!(!anonymous.contains("/logout"));
    }

    #[test]
    fn email_is_escaped() {
        let page = index_page(Some(&Identity::Email("<script>@x.com".into())));
        assert!(page.contains("&lt;script&gt;@x.com"));
        assert!(!page.contains("<script>@x.com"));
    }
}
