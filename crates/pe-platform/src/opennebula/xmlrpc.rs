// SPDX-License-Identifier: MIT OR Apache-2.0
//! Minimal oned XML-RPC support: building `one.vm.info` calls and reading
//! their responses.

use pe_core::{InstanceId, LiveInstanceAttributes};
use roxmltree::{Document, Node};

use crate::PlatformError;

/// oned error codes that have an HTTP-like meaning.
const AUTHENTICATION: i64 = 0x0100;
const AUTHORIZATION: i64 = 0x0200;
const NO_EXISTS: i64 = 0x0400;

const VM_STATES: [&str; 12] = [
    "INIT",
    "PENDING",
    "HOLD",
    "ACTIVE",
    "STOPPED",
    "SUSPENDED",
    "DONE",
    "FAILED",
    "POWEROFF",
    "UNDEPLOYED",
    "CLONING",
    "CLONING_FAILURE",
];

/// Human-readable name of a numeric VM state.
pub(crate) fn state_name(state: &str) -> String {
    state
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|i| VM_STATES.get(i))
        .map_or_else(|| "UNKNOWN".to_string(), |s| (*s).to_string())
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Body of a `one.vm.info` method call.
pub(crate) fn vm_info_request(session: &str, instance_id: InstanceId) -> String {
    format!(
        "<?xml version=\"1.0\"?>\
         <methodCall><methodName>one.vm.info</methodName><params>\
         <param><value><string>{}</string></value></param>\
         <param><value><int>{instance_id}</int></value></param>\
         </params></methodCall>",
        escape(session)
    )
}

fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

fn scalar(value: Node<'_, '_>) -> String {
    // A <value> either wraps a typed element or holds bare text (string).
    value
        .children()
        .find(|n| n.is_element())
        .and_then(|typed| typed.text())
        .or_else(|| value.text())
        .unwrap_or_default()
        .to_string()
}

fn platform_status(code: i64) -> u16 {
    match code {
        AUTHENTICATION => 401,
        AUTHORIZATION => 403,
        NO_EXISTS => 404,
        _ => 500,
    }
}

/// Decode a `one.vm.info` response into live instance attributes.
pub(crate) fn parse_vm_info_response(body: &str) -> Result<LiveInstanceAttributes, PlatformError> {
    let doc = Document::parse(body)
        .map_err(|e| PlatformError::Malformed(format!("xml-rpc response: {e}")))?;
    let root = doc.root_element();

    if let Some(fault) = root.descendants().find(|n| n.has_tag_name("fault")) {
        let message = fault
            .descendants()
            .find(|n| n.has_tag_name("name") && n.text() == Some("faultString"))
            .and_then(|n| n.parent())
            .and_then(|member| child(member, "value"))
            .map(scalar)
            .unwrap_or_else(|| "xml-rpc fault".to_string());
        return Err(PlatformError::status(500, message));
    }

    let values: Vec<Node<'_, '_>> = root
        .descendants()
        .find(|n| n.has_tag_name("data"))
        .map(|data| data.children().filter(|n| n.has_tag_name("value")).collect())
        .ok_or_else(|| PlatformError::Malformed("xml-rpc response has no result array".into()))?;

    let success = values
        .first()
        .map(|v| matches!(scalar(*v).trim(), "1" | "true"))
        .ok_or_else(|| PlatformError::Malformed("xml-rpc result array is empty".into()))?;
    let payload = values.get(1).map(|v| scalar(*v)).unwrap_or_default();

    if !success {
        let code = values
            .get(2)
            .and_then(|v| scalar(*v).trim().parse::<i64>().ok())
            .unwrap_or(-1);
        return Err(PlatformError::status(platform_status(code), payload));
    }

    parse_vm(&payload)
}

fn text_of(node: Node<'_, '_>, path: &[&str]) -> Option<String> {
    let mut current = node;
    for segment in path {
        current = child(current, segment)?;
    }
    current
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn indexed<'a, 'input>(
    template: Node<'a, 'input>,
    tag: &str,
    index_tag: &str,
) -> Option<Node<'a, 'input>> {
    template
        .children()
        .filter(|n| n.has_tag_name(tag))
        .find(|n| text_of(*n, &[index_tag]).as_deref() == Some("0"))
}

/// Decode the VM document returned inside a successful `one.vm.info`.
pub(crate) fn parse_vm(xml: &str) -> Result<LiveInstanceAttributes, PlatformError> {
    let doc = Document::parse(xml).map_err(|e| PlatformError::Malformed(format!("vm xml: {e}")))?;
    let vm = doc.root_element();
    if !vm.has_tag_name("VM") {
        return Err(PlatformError::Malformed(format!(
            "expected VM document, got <{}>",
            vm.tag_name().name()
        )));
    }

    let id = text_of(vm, &["ID"])
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PlatformError::Malformed("VM document has no numeric ID".into()))?;
    let state = state_name(&text_of(vm, &["STATE"]).unwrap_or_default());

    let template = child(vm, "TEMPLATE");
    let field = |name: &str| template.and_then(|t| text_of(t, &[name]));

    Ok(LiveInstanceAttributes {
        id,
        state,
        address: template
            .and_then(|t| indexed(t, "NIC", "NIC_ID"))
            .and_then(|nic| text_of(nic, &["IP"])),
        cpu: field("CPU").and_then(|s| s.parse().ok()),
        vcpu: field("VCPU").and_then(|s| s.parse().ok()),
        memory: field("MEMORY").and_then(|s| s.parse().ok()),
        disk_size: template
            .and_then(|t| indexed(t, "DISK", "DISK_ID"))
            .and_then(|disk| text_of(disk, &["SIZE"]))
            .and_then(|s| s.parse().ok()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const VM: &str = "<VM><ID>42</ID><NAME>faas_0</NAME><STATE>3</STATE><TEMPLATE>\
        <CPU><![CDATA[0.5]]></CPU><VCPU>2</VCPU><MEMORY>768</MEMORY>\
        <DISK><DISK_ID>1</DISK_ID><SIZE>10</SIZE></DISK>\
        <DISK><DISK_ID>0</DISK_ID><SIZE>2048</SIZE></DISK>\
        <NIC><IP>172.16.0.9</IP><NIC_ID>0</NIC_ID></NIC>\
        </TEMPLATE></VM>";

    fn response(success: bool, payload: &str, code: i64) -> String {
        let flag = if success { 1 } else { 0 };
        format!(
            "<?xml version=\"1.0\"?><methodResponse><params><param><value><array><data>\
             <value><boolean>{flag}</boolean></value>\
             <value><string>{}</string></value>\
             <value><i4>{code}</i4></value>\
             </data></array></value></param></params></methodResponse>",
            escape(payload)
        )
    }

    #[test]
    fn request_escapes_session() {
        let body = vm_info_request("user:p<&>", 7);
        assert!(body.contains("<methodName>one.vm.info</methodName>"));
        assert!(body.contains("user:p&lt;&amp;&gt;"));
        assert!(body.contains("<int>7</int>"));
    }

    #[test]
    fn vm_document_is_decoded() {
        let attrs = parse_vm(VM).unwrap();
        assert_eq!(attrs.id, 42);
        assert_eq!(attrs.state, "ACTIVE");
        assert_eq!(attrs.address.as_deref(), Some("172.16.0.9"));
        assert_eq!(attrs.cpu, Some(0.5));
        assert_eq!(attrs.vcpu, Some(2));
        assert_eq!(attrs.memory, Some(768));
        assert_eq!(attrs.disk_size, Some(2048));
    }

    #[test]
    fn sparse_vm_document_leaves_fields_empty() {
        let attrs = parse_vm("<VM><ID>5</ID><STATE>1</STATE></VM>").unwrap();
        assert_eq!(attrs.state, "PENDING");
        assert_eq!(attrs.address, None);
        assert_eq!(attrs.memory, None);
    }

    #[test]
    fn successful_response_wraps_vm() {
        let attrs = parse_vm_info_response(&response(true, VM, 0)).unwrap();
        assert_eq!(attrs.id, 42);
    }

    #[test]
    fn error_codes_map_to_statuses() {
        for (code, status) in [(0x100, 401), (0x200, 403), (0x400, 404), (0x800, 500)] {
            let err = parse_vm_info_response(&response(false, "[one.vm.info] failed", code))
                .unwrap_err();
            assert_eq!(err.status_code(), status, "code {code:#x}");
        }
    }

    #[test]
    fn fault_is_a_server_error() {
        let body = "<methodResponse><fault><value><struct>\
            <member><name>faultCode</name><value><int>-1</int></value></member>\
            <member><name>faultString</name><value><string>bad call</string></value></member>\
            </struct></value></fault></methodResponse>";
        let err = parse_vm_info_response(body).unwrap_err();
        assert_eq!(err.status_code(), 500);
        assert!(err.to_string().contains("bad call"));
    }

    #[test]
    fn unknown_states() {
        assert_eq!(state_name("99"), "UNKNOWN");
        assert_eq!(state_name("x"), "UNKNOWN");
        assert_eq!(state_name("8"), "POWEROFF");
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            parse_vm_info_response("not xml"),
            Err(PlatformError::Malformed(_))
        ));
    }
}
