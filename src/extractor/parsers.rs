//! Per-tool output parsers.
//!
//! Every parser is a pure function over raw output. Lines it cannot read are
//! counted as skipped and never abort the rest of the parse.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Map, Value};

use crate::models::{Finding, FindingType, Severity};

pub struct ParseContext<'a> {
    pub tool: &'a str,
    pub invocation_id: &'a str,
    /// Asset the invocation was aimed at.
    pub subject: &'a str,
    /// Base URL argument, for tools that print relative paths.
    pub base_url: Option<&'a str>,
    pub output: &'a str,
}

impl ParseContext<'_> {
    fn finding(&self, finding_type: FindingType, subject: impl Into<String>) -> Finding {
        Finding::new(finding_type, subject, self.tool, self.invocation_id)
    }
}

#[derive(Debug, Default)]
pub struct ParseOutput {
    pub findings: Vec<Finding>,
    pub skipped: usize,
}

pub type ParserFn = fn(&ParseContext<'_>) -> ParseOutput;

/// Built-in parsers by name.
pub const BUILTIN_PARSERS: &[(&str, ParserFn)] = &[
    ("subdomains", parse_subdomains),
    ("ports", parse_ports),
    ("http-endpoints", parse_http_endpoints),
    ("nuclei-jsonl", parse_nuclei),
    ("sqlmap", parse_sqlmap),
    ("whatweb", parse_whatweb),
    ("generic", parse_generic),
];

static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9_](?:[a-z0-9_-]{0,61}[a-z0-9])?\.)+[a-z][a-z0-9-]{0,62}$").unwrap()
});
static NMAP_REPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Nmap scan report for (\S+)(?: \(([^)]+)\))?").unwrap()
});
static NMAP_PORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,5})/(tcp|udp)\s+(open(?:\|filtered)?)\s+(\S+)(?:\s+(.+))?$").unwrap()
});
static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+)\s+[\[(]Status:\s*(\d{3})").unwrap()
});
static URL_STATUS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://\S+)(?:\s+\[?(\d{3})\]?)?").unwrap()
});
static NUCLEI_TEXT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[([^\]]+)\]\s+\[([^\]]+)\]\s+\[([^\]]+)\]\s+(\S+)").unwrap()
});
static SQLMAP_PARAM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Parameter:\s+(.+?)\s+\(([^)]+)\)").unwrap()
});
static SQLMAP_DBMS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"back-end DBMS(?: is|:)\s+(.+)$").unwrap()
});
static WHATWEB_PLUGIN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Za-z][A-Za-z0-9_.\- ]*?)(?:\[([^\]]*)\])+").unwrap()
});

/// One host per line, plain or `{"host": ...}` JSON.
pub fn parse_subdomains(ctx: &ParseContext<'_>) -> ParseOutput {
    let mut out = ParseOutput::default();
    for line in ctx.output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let (host, source) = if line.starts_with('{') {
            match serde_json::from_str::<Value>(line) {
                Ok(v) => (
                    v.get("host").and_then(Value::as_str).unwrap_or_default().to_string(),
                    v.get("source").cloned(),
                ),
                Err(_) => {
                    out.skipped += 1;
                    continue;
                }
            }
        } else {
            (line.to_string(), None)
        };

        let host = host.trim().trim_end_matches('.').to_lowercase();
        if !HOSTNAME.is_match(&host) {
            out.skipped += 1;
            continue;
        }
        let mut finding = ctx.finding(FindingType::Subdomain, host.clone());
        finding.evidence = match source {
            Some(source) => json!({ "host": host, "source": source }),
            None => json!({ "host": host }),
        };
        out.findings.push(finding);
    }
    out
}

/// nmap normal output. Service versions also yield technology findings.
pub fn parse_ports(ctx: &ParseContext<'_>) -> ParseOutput {
    let mut out = ParseOutput::default();
    let mut host = ctx.subject.to_string();

    for line in ctx.output.lines().map(str::trim) {
        if let Some(caps) = NMAP_REPORT.captures(line) {
            host = caps[1].to_lowercase();
            continue;
        }
        let Some(caps) = NMAP_PORT.captures(line) else {
            continue;
        };
        let Ok(port) = caps[1].parse::<u16>() else {
            out.skipped += 1;
            continue;
        };
        let protocol = &caps[2];
        let service = &caps[4];
        let version = caps.get(5).map(|m| m.as_str().trim()).filter(|v| !v.is_empty());
        let subject = format!("{}:{}", host, port);

        let mut evidence = Map::new();
        evidence.insert("host".into(), json!(host));
        evidence.insert("port".into(), json!(port));
        evidence.insert("protocol".into(), json!(protocol));
        evidence.insert("state".into(), json!(&caps[3]));
        evidence.insert("service".into(), json!(service));
        if let Some(v) = version {
            evidence.insert("version".into(), json!(v));
        }
        if matches!(service, "http" | "https" | "http-proxy" | "ssl/http" | "http-alt") {
            let scheme = if service.contains("ssl") || service == "https" || port == 443 { "https" } else { "http" };
            evidence.insert("url".into(), json!(format!("{}://{}:{}", scheme, host, port)));
        }
        out.findings.push(ctx.finding(FindingType::OpenPort, subject.clone()).with_evidence(Value::Object(evidence)));

        if let Some(v) = version {
            out.findings.push(
                ctx.finding(FindingType::Technology, subject)
                    .with_confidence(0.8)
                    .with_evidence(json!({ "service": service, "product": v, "port": port })),
            );
        }
    }
    out
}

/// ffuf / gobuster / plain URL listings.
pub fn parse_http_endpoints(ctx: &ParseContext<'_>) -> ParseOutput {
    let mut out = ParseOutput::default();
    for line in ctx.output.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#')) {
        let (path, status) = if line.starts_with('{') {
            match serde_json::from_str::<Value>(line) {
                Ok(v) => (
                    v.get("url").and_then(Value::as_str).unwrap_or_default().to_string(),
                    v.get("status").and_then(Value::as_u64),
                ),
                Err(_) => {
                    out.skipped += 1;
                    continue;
                }
            }
        } else if let Some(caps) = URL_STATUS.captures(line) {
            (caps[1].to_string(), caps.get(2).and_then(|m| m.as_str().parse().ok()))
        } else if let Some(caps) = STATUS_LINE.captures(line) {
            (caps[1].to_string(), caps[2].parse().ok())
        } else if !line.contains(char::is_whitespace) {
            // ffuf -s prints the bare word
            (line.to_string(), None)
        } else {
            out.skipped += 1;
            continue;
        };

        let Some(url) = join_url(ctx.base_url, &path) else {
            out.skipped += 1;
            continue;
        };
        let mut finding = ctx.finding(FindingType::Endpoint, url.clone());
        finding.evidence = json!({ "url": url, "path": path, "status": status });
        out.findings.push(finding);
    }
    out
}

fn join_url(base: Option<&str>, path: &str) -> Option<String> {
    if path.is_empty() {
        return None;
    }
    if path.starts_with("http://") || path.starts_with("https://") {
        return Some(path.to_string());
    }
    let base = base?.trim_end_matches('/').trim_end_matches("/FUZZ");
    Some(format!("{}/{}", base, path.trim_start_matches('/')))
}

/// nuclei `-jsonl` output, with the plain-text format as a fallback.
pub fn parse_nuclei(ctx: &ParseContext<'_>) -> ParseOutput {
    let mut out = ParseOutput::default();
    for line in ctx.output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        if line.starts_with('{') {
            let Ok(v) = serde_json::from_str::<Value>(line) else {
                out.skipped += 1;
                continue;
            };
            let matched = v.get("matched-at").or_else(|| v.get("host")).and_then(Value::as_str);
            let Some(matched) = matched else {
                out.skipped += 1;
                continue;
            };
            let info = v.get("info").cloned().unwrap_or(Value::Null);
            let severity = info.get("severity").and_then(Value::as_str)
                .and_then(Severity::from_label)
                .unwrap_or(Severity::Info);
            let evidence = json!({
                "url": matched,
                "template_id": v.get("template-id"),
                "name": info.get("name"),
                "matcher": v.get("matcher-name"),
                "protocol": v.get("type"),
                "extracted": v.get("extracted-results"),
            });
            out.findings.push(
                ctx.finding(FindingType::Vulnerability, matched)
                    .with_severity(severity)
                    .with_confidence(0.9)
                    .with_evidence(evidence),
            );
        } else if let Some(caps) = NUCLEI_TEXT.captures(line) {
            let severity = Severity::from_label(&caps[3]).unwrap_or(Severity::Info);
            out.findings.push(
                ctx.finding(FindingType::Vulnerability, &caps[4])
                    .with_severity(severity)
                    .with_confidence(0.9)
                    .with_evidence(json!({ "url": &caps[4], "template_id": &caps[1], "protocol": &caps[2] })),
            );
        } else {
            out.skipped += 1;
        }
    }
    out
}

/// sqlmap console output: one vulnerability per injectable parameter.
pub fn parse_sqlmap(ctx: &ParseContext<'_>) -> ParseOutput {
    struct Injection {
        parameter: String,
        place: String,
        techniques: Vec<String>,
        payloads: Vec<String>,
    }

    let mut out = ParseOutput::default();
    let mut injections: Vec<Injection> = Vec::new();
    let mut dbms = None;

    for line in ctx.output.lines().map(str::trim) {
        if let Some(caps) = SQLMAP_PARAM.captures(line) {
            injections.push(Injection {
                parameter: caps[1].to_string(),
                place: caps[2].to_string(),
                techniques: Vec::new(),
                payloads: Vec::new(),
            });
        } else if let Some(t) = line.strip_prefix("Type:") {
            if let Some(current) = injections.last_mut() {
                current.techniques.push(t.trim().to_string());
            }
        } else if let Some(p) = line.strip_prefix("Payload:") {
            if let Some(current) = injections.last_mut() {
                current.payloads.push(p.trim().to_string());
            }
        } else if let Some(caps) = SQLMAP_DBMS.captures(line) {
            dbms = Some(caps[1].trim().to_string());
        }
    }

    let url = ctx.base_url.unwrap_or(ctx.subject);
    for injection in injections {
        let severity = if injection.techniques.iter().any(|t| t.contains("stacked")) {
            Severity::Critical
        } else {
            Severity::High
        };
        out.findings.push(
            ctx.finding(FindingType::Vulnerability, format!("{}#{}", url, injection.parameter))
                .with_severity(severity)
                .with_confidence(0.95)
                .with_evidence(json!({
                    "url": url,
                    "parameter": injection.parameter,
                    "place": injection.place,
                    "techniques": injection.techniques,
                    "payloads": injection.payloads,
                    "dbms": dbms,
                })),
        );
    }
    if let Some(dbms) = dbms {
        out.findings.push(
            ctx.finding(FindingType::Technology, url)
                .with_confidence(0.9)
                .with_evidence(json!({ "url": url, "technologies": { "dbms": dbms } })),
        );
    }
    out
}

/// Plugins that describe the response rather than the stack.
const WHATWEB_NOISE: &[&str] = &["Country", "IP", "Title", "Email", "UncommonHeaders", "RedirectLocation"];

/// whatweb default output: `URL [status] Plugin[version], Plugin, ...`
pub fn parse_whatweb(ctx: &ParseContext<'_>) -> ParseOutput {
    let mut out = ParseOutput::default();
    for line in ctx.output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((url, rest)) = line.split_once(' ') else {
            out.skipped += 1;
            continue;
        };
        if !url.starts_with("http") {
            out.skipped += 1;
            continue;
        }
        let rest = rest.trim_start();
        let (status, plugins) = match rest.strip_prefix('[').and_then(|r| r.split_once(']')) {
            Some((status, plugins)) => (Some(status.trim().to_string()), plugins),
            None => (None, rest),
        };

        let mut technologies = Map::new();
        for caps in WHATWEB_PLUGIN.captures_iter(plugins) {
            let name = caps[1].trim().trim_start_matches(',').trim();
            if name.is_empty() || WHATWEB_NOISE.contains(&name) {
                continue;
            }
            technologies.insert(name.to_string(), json!(caps.get(2).map(|m| m.as_str())));
        }
        for bare in plugins.split(", ").map(str::trim).filter(|p| !p.is_empty() && !p.contains('[')) {
            if !WHATWEB_NOISE.contains(&bare) {
                technologies.entry(bare.to_string()).or_insert(Value::Null);
            }
        }
        if technologies.is_empty() {
            continue;
        }
        out.findings.push(
            ctx.finding(FindingType::Technology, url)
                .with_evidence(json!({ "url": url, "status": status, "technologies": technologies })),
        );
    }
    out
}

const VULN_INDICATORS: &[&str] = &["VULNERABLE", "CVE-", "CRITICAL", "vulnerability"];

/// Fallback for tools without a dedicated parser: a low-confidence
/// vulnerability hint when the output carries a known indicator.
pub fn parse_generic(ctx: &ParseContext<'_>) -> ParseOutput {
    let mut out = ParseOutput::default();
    if let Some(indicator) = VULN_INDICATORS.iter().find(|i| ctx.output.contains(*i)) {
        let excerpt: String = ctx.output.chars().take(500).collect();
        out.findings.push(
            ctx.finding(FindingType::Vulnerability, ctx.subject)
                .with_severity(Severity::Medium)
                .with_confidence(0.3)
                .with_evidence(json!({ "indicator": indicator, "excerpt": excerpt })),
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(tool: &'a str, output: &'a str, base_url: Option<&'a str>) -> ParseContext<'a> {
        ParseContext { tool, invocation_id: "r.0", subject: "example.com", base_url, output }
    }

    #[test]
    fn test_subdomains_plain_and_json() {
        let out = parse_subdomains(&ctx(
            "subdomain-scanner",
            "a.example.com\n{\"host\":\"B.example.com\",\"source\":\"crtsh\"}\nnot a host!\n{broken\n",
            None,
        ));
        let subjects: Vec<&str> = out.findings.iter().map(|f| f.subject.as_str()).collect();
        assert_eq!(subjects, vec!["a.example.com", "b.example.com"]);
        assert_eq!(out.findings[1].evidence["source"], "crtsh");
        assert_eq!(out.skipped, 2);
    }

    #[test]
    fn test_nmap_ports_and_versions() {
        let output = "\
Starting Nmap 7.94
Nmap scan report for a.example.com (93.184.216.34)
PORT    STATE  SERVICE VERSION
22/tcp  open   ssh     OpenSSH 8.9p1
80/tcp  open   http
443/tcp closed https
";
        let out = parse_ports(&ctx("port-scanner", output, None));
        let ports: Vec<_> = out.findings.iter()
            .filter(|f| f.finding_type == FindingType::OpenPort)
            .map(|f| f.subject.as_str())
            .collect();
        assert_eq!(ports, vec!["a.example.com:22", "a.example.com:80"]);
        assert_eq!(out.findings[0].evidence["port"], 22);
        let tech: Vec<_> = out.findings.iter().filter(|f| f.finding_type == FindingType::Technology).collect();
        assert_eq!(tech.len(), 1);
        assert_eq!(tech[0].evidence["product"], "OpenSSH 8.9p1");
        let http = out.findings.iter().find(|f| f.subject == "a.example.com:80").unwrap();
        assert_eq!(http.evidence["url"], "http://a.example.com:80");
    }

    #[test]
    fn test_nmap_without_report_line_uses_subject() {
        let out = parse_ports(&ctx("port-scanner", "8080/tcp open http-proxy\n", None));
        assert_eq!(out.findings[0].subject, "example.com:8080");
    }

    #[test]
    fn test_http_endpoints_formats() {
        let output = "\
admin                   [Status: 301, Size: 0, Words: 1, Lines: 1]
/login                (Status: 200) [Size: 1234]
https://a.example.com/api [403]
backup
this line has words but no status
";
        let out = parse_http_endpoints(&ctx("dir-bruteforcer", output, Some("https://a.example.com/")));
        let urls: Vec<&str> = out.findings.iter().map(|f| f.subject.as_str()).collect();
        assert_eq!(urls, vec![
            "https://a.example.com/admin",
            "https://a.example.com/login",
            "https://a.example.com/api",
            "https://a.example.com/backup",
        ]);
        assert_eq!(out.findings[0].evidence["status"], 301);
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_relative_path_without_base_is_skipped() {
        let out = parse_http_endpoints(&ctx("dir-bruteforcer", "admin\n", None));
        assert!(out.findings.is_empty());
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_nuclei_jsonl_and_text() {
        let output = r#"{"template-id":"git-config","info":{"name":"Git Config","severity":"medium"},"type":"http","matched-at":"https://a.example.com/.git/config"}
[CVE-2021-44228] [http] [critical] https://a.example.com/api
{"truncated
"#;
        let out = parse_nuclei(&ctx("vuln-scanner", output, None));
        assert_eq!(out.findings.len(), 2);
        assert_eq!(out.findings[0].severity, Severity::Medium);
        assert_eq!(out.findings[0].evidence["template_id"], "git-config");
        assert_eq!(out.findings[1].severity, Severity::Critical);
        assert_eq!(out.skipped, 1);
    }

    #[test]
    fn test_sqlmap_injection_points() {
        let output = "\
sqlmap identified the following injection point(s) with a total of 46 HTTP(s) requests:
---
Parameter: id (GET)
    Type: boolean-based blind
    Title: AND boolean-based blind - WHERE or HAVING clause
    Payload: id=1 AND 5913=5913
    Type: stacked queries
    Payload: id=1;SELECT SLEEP(5)
---
[INFO] the back-end DBMS is MySQL
";
        let out = parse_sqlmap(&ctx("sql-injection", output, Some("https://a.example.com/item?id=1")));
        assert_eq!(out.findings.len(), 2);
        let vuln = &out.findings[0];
        assert_eq!(vuln.subject, "https://a.example.com/item?id=1#id");
        assert_eq!(vuln.severity, Severity::Critical);
        assert_eq!(vuln.evidence["techniques"].as_array().unwrap().len(), 2);
        assert_eq!(out.findings[1].evidence["technologies"]["dbms"], "MySQL");
    }

    #[test]
    fn test_sqlmap_nothing_found() {
        let out = parse_sqlmap(&ctx("sql-injection", "[WARNING] GET parameter 'id' does not seem to be injectable\n", None));
        assert!(out.findings.is_empty());
    }

    #[test]
    fn test_whatweb() {
        let output = "https://a.example.com [200 OK] Apache[2.4.41], Country[RESERVED][ZZ], HTML5, JQuery[3.5.1], Title[Home]\n";
        let out = parse_whatweb(&ctx("tech-detector", output, None));
        assert_eq!(out.findings.len(), 1);
        let tech = &out.findings[0].evidence["technologies"];
        assert_eq!(tech["Apache"], "2.4.41");
        assert_eq!(tech["JQuery"], "3.5.1");
        assert!(tech.get("HTML5").is_some());
        assert!(tech.get("Country").is_none());
        assert!(tech.get("Title").is_none());
    }

    #[test]
    fn test_generic_indicator() {
        let out = parse_generic(&ctx("custom", "host is VULNERABLE to CVE-2014-0160", None));
        assert_eq!(out.findings.len(), 1);
        assert_eq!(out.findings[0].subject, "example.com");
        assert!(parse_generic(&ctx("custom", "all good", None)).findings.is_empty());
    }
}
