// ── Share links for X-UI clients ──
//
// Built from the inbound's protocol and stream settings the same way client
// apps expect them: `vless://`, `trojan://`, `vmess://` (base64 JSON) and
// `ss://` (SIP002).

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use serde_json::Value;
use url::form_urlencoded;

use panelkit_api::xui::{Inbound, InboundClient, InboundSettings};

/// Share link for `client` on `inbound`, reachable at `host`. `None` for
/// protocols without a standard link format.
pub fn share_link(
    inbound: &Inbound,
    settings: &InboundSettings,
    client: &InboundClient,
    host: &str,
) -> Option<String> {
    let stream = inbound.parsed_stream();
    let remark = fragment(&format!("{}-{}", inbound.remark, client.email));
    let port = inbound.port;

    match inbound.protocol.as_str() {
        "vless" => {
            let id = client.id.as_deref()?;
            let mut query = stream_query(&stream);
            if !client.flow.is_empty() {
                query.append_pair("flow", &client.flow);
            }
            query.append_pair("encryption", "none");
            Some(format!(
                "vless://{id}@{host}:{port}?{}#{remark}",
                query.finish()
            ))
        }
        "trojan" => {
            let password = client.password.as_deref()?;
            let mut query = stream_query(&stream);
            Some(format!(
                "trojan://{}@{host}:{port}?{}#{remark}",
                fragment(password),
                query.finish()
            ))
        }
        "vmess" => {
            let id = client.id.as_deref()?;
            let network = str_at(&stream, &["network"]).unwrap_or("tcp");
            let security = str_at(&stream, &["security"]).unwrap_or("none");
            let body = serde_json::json!({
                "v": "2",
                "ps": format!("{}-{}", inbound.remark, client.email),
                "add": host,
                "port": port,
                "id": id,
                "aid": 0,
                "scy": "auto",
                "net": network,
                "type": "none",
                "host": transport_host(&stream, network).unwrap_or_default(),
                "path": transport_path(&stream, network).unwrap_or_default(),
                "tls": if security == "none" { "" } else { security },
                "sni": server_name(&stream).unwrap_or_default(),
            });
            Some(format!("vmess://{}", STANDARD.encode(body.to_string())))
        }
        "shadowsocks" => {
            let method = settings.rest.get("method").and_then(Value::as_str)?;
            let client_password = client.password.as_deref()?;
            // 2022 ciphers in multi-user mode take "server:client" keys.
            let password = match settings.rest.get("password").and_then(Value::as_str) {
                Some(server) if method.starts_with("2022-") => format!("{server}:{client_password}"),
                _ => client_password.to_owned(),
            };
            let user_info = URL_SAFE_NO_PAD.encode(format!("{method}:{password}"));
            Some(format!("ss://{user_info}@{host}:{port}#{remark}"))
        }
        _ => None,
    }
}

/// Transport and TLS query parameters shared by VLESS and Trojan links.
fn stream_query(stream: &Value) -> form_urlencoded::Serializer<'static, String> {
    let network = str_at(stream, &["network"]).unwrap_or("tcp");
    let security = str_at(stream, &["security"]).unwrap_or("none");

    let mut query = form_urlencoded::Serializer::new(String::new());
    query.append_pair("type", network);
    query.append_pair("security", security);

    if let Some(path) = transport_path(stream, network) {
        query.append_pair(if network == "grpc" { "serviceName" } else { "path" }, &path);
    }
    if let Some(host) = transport_host(stream, network) {
        query.append_pair("host", &host);
    }
    if let Some(sni) = server_name(stream) {
        query.append_pair("sni", &sni);
    }
    if security == "reality" {
        let reality = &stream["realitySettings"];
        if let Some(pbk) = str_at(reality, &["settings", "publicKey"]) {
            query.append_pair("pbk", pbk);
        }
        if let Some(fp) = str_at(reality, &["settings", "fingerprint"]) {
            query.append_pair("fp", fp);
        }
        if let Some(sid) = reality["shortIds"].get(0).and_then(Value::as_str) {
            query.append_pair("sid", sid);
        }
    } else if let Some(fp) = str_at(stream, &["tlsSettings", "settings", "fingerprint"]) {
        query.append_pair("fp", fp);
    }
    query
}

fn transport_path(stream: &Value, network: &str) -> Option<String> {
    let path = match network {
        "ws" => str_at(stream, &["wsSettings", "path"]),
        "httpupgrade" => str_at(stream, &["httpupgradeSettings", "path"]),
        "xhttp" | "splithttp" => str_at(stream, &["xhttpSettings", "path"]),
        "grpc" => str_at(stream, &["grpcSettings", "serviceName"]),
        _ => None,
    }?;
    (!path.is_empty()).then(|| path.to_owned())
}

fn transport_host(stream: &Value, network: &str) -> Option<String> {
    let host = match network {
        "ws" => str_at(stream, &["wsSettings", "headers", "Host"])
            .or_else(|| str_at(stream, &["wsSettings", "host"])),
        "httpupgrade" => str_at(stream, &["httpupgradeSettings", "host"]),
        "xhttp" | "splithttp" => str_at(stream, &["xhttpSettings", "host"]),
        _ => None,
    }?;
    (!host.is_empty()).then(|| host.to_owned())
}

fn server_name(stream: &Value) -> Option<String> {
    str_at(stream, &["tlsSettings", "serverName"])
        .or_else(|| {
            stream["realitySettings"]["serverNames"]
                .get(0)
                .and_then(Value::as_str)
        })
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(key))
        .and_then(Value::as_str)
}

fn fragment(text: &str) -> String {
    form_urlencoded::byte_serialize(text.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inbound(protocol: &str, settings: &str, stream: &Value) -> Inbound {
        serde_json::from_value(serde_json::json!({
            "id": 1, "remark": "main", "port": 443, "protocol": protocol,
            "settings": settings, "streamSettings": stream.to_string()
        }))
        .unwrap()
    }

    fn client(json: &Value) -> InboundClient {
        serde_json::from_value(json.clone()).unwrap()
    }

    #[test]
    fn vless_reality_link() {
        let stream = serde_json::json!({
            "network": "tcp", "security": "reality",
            "realitySettings": {
                "serverNames": ["www.example.com"], "shortIds": ["ab12"],
                "settings": { "publicKey": "PBK", "fingerprint": "chrome" }
            }
        });
        let inb = inbound("vless", "{}", &stream);
        let c = client(&serde_json::json!({ "id": "uuid-1", "email": "alice", "flow": "xtls-rprx-vision" }));
        let link = share_link(&inb, &InboundSettings::default(), &c, "vpn.example.com").unwrap();
        assert_eq!(
            link,
            "vless://uuid-1@vpn.example.com:443?type=tcp&security=reality&sni=www.example.com&pbk=PBK&fp=chrome&sid=ab12&flow=xtls-rprx-vision&encryption=none#main-alice"
        );
    }

    #[test]
    fn vmess_link_is_base64_json() {
        let stream = serde_json::json!({ "network": "ws", "security": "none", "wsSettings": { "path": "/ws" } });
        let inb = inbound("vmess", "{}", &stream);
        let c = client(&serde_json::json!({ "id": "uuid-2", "email": "bob" }));
        let link = share_link(&inb, &InboundSettings::default(), &c, "h").unwrap();
        let payload = STANDARD.decode(link.trim_start_matches("vmess://")).unwrap();
        let json: Value = serde_json::from_slice(&payload).unwrap();
        assert_eq!(json["id"], "uuid-2");
        assert_eq!(json["net"], "ws");
        assert_eq!(json["path"], "/ws");
    }

    #[test]
    fn shadowsocks_2022_uses_server_and_client_keys() {
        let settings: InboundSettings = serde_json::from_str(
            r#"{"method":"2022-blake3-aes-128-gcm","password":"SRV","clients":[]}"#,
        )
        .unwrap();
        let inb = inbound("shadowsocks", "{}", &serde_json::json!({ "network": "tcp" }));
        let c = client(&serde_json::json!({ "password": "CLI", "email": "carol" }));
        let link = share_link(&inb, &settings, &c, "h").unwrap();
        let user_info = link.trim_start_matches("ss://").split('@').next().unwrap();
        let decoded = String::from_utf8(URL_SAFE_NO_PAD.decode(user_info).unwrap()).unwrap();
        assert_eq!(decoded, "2022-blake3-aes-128-gcm:SRV:CLI");
    }

    #[test]
    fn unknown_protocol_has_no_link() {
        let inb = inbound("dokodemo-door", "{}", &Value::Null);
        let c = client(&serde_json::json!({ "email": "x" }));
        assert_eq!(share_link(&inb, &InboundSettings::default(), &c, "h"), None);
    }
}
