//! The captive setup page served while the bridge hosts its own access point.
//!
//! The page is embedded in the binary so setup works even when the web root
//! is missing.  Its script polls `GET /status` once per second and renders the
//! connection state.

/// Placeholder replaced by the (escaped) SSID of the saved network.
const SSID_PLACEHOLDER: &str = "{{SSID}}";

const SETUP_PAGE_TEMPLATE: &str = r#"<!doctype html>
<html lang="en">
  <head>
    <meta charset="utf-8" />
    <meta name="viewport" content="width=device-width, initial-scale=1" />
    <title>Preamp Bridge Setup</title>
    <style>
      body { font-family: system-ui, sans-serif; background: #f4efe8; color: #2a231d; margin: 0; padding: 24px; }
      main { max-width: 440px; margin: 0 auto; background: #fffbf5; border: 1px solid #ddd2c4; border-radius: 14px; padding: 20px; }
      h1 { margin-top: 0; font-size: 1.4rem; }
      label { display: block; margin: 12px 0 4px; font-weight: 600; }
      input { box-sizing: border-box; width: 100%; padding: 10px; border: 1px solid #d5c8b8; border-radius: 8px; font-size: 1rem; }
      button { margin-top: 14px; padding: 10px 14px; border: 0; border-radius: 8px; background: #176f65; color: #fff; font-weight: 600; }
      button.secondary { background: #6d6258; }
      .note { margin-top: 12px; color: #685c52; }
    </style>
  </head>
  <body>
    <main>
      <h1>Wi-Fi Setup</h1>
      <form method="post" action="/save">
        <label for="ssid">Network name (SSID)</label>
        <input id="ssid" name="ssid" value="{{SSID}}" required />
        <label for="password">Password</label>
        <input id="password" name="password" type="password" />
        <button type="submit">Save &amp; Connect</button>
      </form>
      <form method="post" action="/retry">
        <button type="submit" class="secondary">Try Existing Credentials</button>
      </form>
      <form method="post" action="/clear" onsubmit="return confirm('Clear saved Wi-Fi credentials?');">
        <button type="submit" class="secondary">Clear Credentials</button>
      </form>
      <p id="staStatus" class="note">Waiting for Wi-Fi credentials.</p>
      <p id="staIp" class="note"></p>
    </main>
    <script>
      const messages = {
        CONNECTING: "Connecting to Wi-Fi...",
        CONNECTED: "Connected to Wi-Fi.",
        FAILED: "Failed to connect. Check SSID and password.",
      };
      async function refreshStatus() {
        try {
          const text = (await (await fetch("/status")).text()).trim();
          if (!text) return;
          const [state, ip] = text.split(" ");
          document.getElementById("staStatus").textContent =
            messages[state] || "Waiting for Wi-Fi credentials.";
          const ipEl = document.getElementById("staIp");
          ipEl.textContent = "";
          if (state === "CONNECTED" && ip) {
            const link = document.createElement("a");
            link.href = "http://" + ip + "/";
            link.textContent = "Open " + ip;
            ipEl.appendChild(link);
          }
        } catch (e) {}
      }
      setInterval(refreshStatus, 1000);
      refreshStatus();
    </script>
  </body>
</html>
"#;

/// Body returned by `POST /clear` right before the process restarts.
pub const CLEARED_PAGE: &str = "<html><body><h3>Cleared. Rebooting...</h3></body></html>";

/// Renders the setup page with the SSID field pre-filled.
///
/// ```rust
/// use preamp_bridge::infrastructure::setup_page::render_setup_page;
///
/// let page = render_setup_page("Home \"5G\"");
/// assert!(page.contains(r#"value="Home &quot;5G&quot;""#));
/// ```
pub fn render_setup_page(ssid: &str) -> String {
    SETUP_PAGE_TEMPLATE.replace(SSID_PLACEHOLDER, &escape_html(ssid))
}

/// Escapes text for use inside an HTML attribute or element.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
