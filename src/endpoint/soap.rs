//! SOAP fault recognition on raw response bodies.

const FAULT_MARKERS: [&str; 2] = ["<soapenv:Fault", "<faultcode>"];

/// Returns the fault text if `raw` carries a SOAP fault.
///
/// The text is the content of `<faultstring>`, or `"Unknown SOAP fault"`
/// when the element is missing.
pub fn detect_fault(raw: &str) -> Option<String> {
    if !FAULT_MARKERS.iter().any(|m| raw.contains(m)) {
        return None;
    }
    let text = between(raw, "<faultstring>", "</faultstring>")
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or("Unknown SOAP fault");
    Some(text.to_string())
}

fn between<'a>(raw: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = raw.find(open)? + open.len();
    let len = raw[start..].find(close)?;
    Some(&raw[start..start + len])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn regular_response_is_not_a_fault() {
        assert_eq!(detect_fault("<soapenv:Body><ok/></soapenv:Body>"), None);
    }

    #[test]
    fn fault_string_is_extracted() {
        let raw = "<soapenv:Envelope><soapenv:Body><soapenv:Fault>\
                   <faultcode>soapenv:Server</faultcode>\
                   <faultstring> Unit not found </faultstring>\
                   </soapenv:Fault></soapenv:Body></soapenv:Envelope>";
        assert_eq!(detect_fault(raw).as_deref(), Some("Unit not found"));
    }

    #[test]
    fn fault_without_text_gets_a_default() {
        assert_eq!(
            detect_fault("<faultcode>Client</faultcode>").as_deref(),
            Some("Unknown SOAP fault")
        );
    }
}
