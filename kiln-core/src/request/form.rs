use bytes::Bytes;

/// One part of a `multipart/form-data` body.
#[derive(Debug, Clone)]
pub struct Part {
    pub name: String,
    pub filename: Option<String>,
    pub content_type: Option<String>,
    pub data: Bytes,
}

fn boundary(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.eq_ignore_ascii_case("boundary") {
            Some(value.trim_matches('"').to_string())
        } else {
            None
        }
    })
}

fn find(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle)
}

fn disposition_param(line: &str, key: &str) -> Option<String> {
    line.split(';').find_map(|p| {
        let (k, v) = p.trim().split_once('=')?;
        if k.eq_ignore_ascii_case(key) {
            Some(v.trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Split a multipart body into its parts. Malformed parts are skipped.
pub fn parse_multipart(content_type: &str, body: &Bytes) -> Vec<Part> {
    let Some(boundary) = boundary(content_type) else {
        return Vec::new();
    };
    let delimiter = format!("--{boundary}");
    let delimiter = delimiter.as_bytes();

    let mut parts = Vec::new();
    let Some(mut pos) = find(body, delimiter, 0) else {
        return parts;
    };

    loop {
        let start = pos + delimiter.len();
        if body.get(start..start + 2) == Some(b"--") {
            break;
        }
        let Some(next) = find(body, delimiter, start) else {
            break;
        };

        let section = &body[start..next];
        let section = section.strip_prefix(b"\r\n").unwrap_or(section);
        if let Some(split) = find(section, b"\r\n\r\n", 0) {
            let head = String::from_utf8_lossy(&section[..split]);
            let mut data_end = section.len();
            if section[..data_end].ends_with(b"\r\n") {
                data_end -= 2;
            }
            let data_start = (split + 4).min(data_end);

            let mut name = None;
            let mut filename = None;
            let mut part_type = None;
            for line in head.lines() {
                let Some((key, value)) = line.split_once(':') else {
                    continue;
                };
                if key.trim().eq_ignore_ascii_case("content-disposition") {
                    name = disposition_param(value, "name");
                    filename = disposition_param(value, "filename");
                } else if key.trim().eq_ignore_ascii_case("content-type") {
                    part_type = Some(value.trim().to_string());
                }
            }

            if let Some(name) = name {
                let offset = section.as_ptr() as usize - body.as_ptr() as usize;
                parts.push(Part {
                    name,
                    filename,
                    content_type: part_type,
                    data: body.slice(offset + data_start..offset + data_end),
                });
            }
        }
        pos = next;
    }

    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fields_and_files() {
        let body = Bytes::from_static(
            b"--XyZ\r\n\
Content-Disposition: form-data; name=\"title\"\r\n\
\r\n\
Hello\r\n\
--XyZ\r\n\
Content-Disposition: form-data; name=\"upload\"; filename=\"a.txt\"\r\n\
Content-Type: text/plain\r\n\
\r\n\
file body\r\n\
--XyZ--\r\n",
        );

        let parts = parse_multipart("multipart/form-data; boundary=XyZ", &body);

        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].name, "title");
        assert_eq!(&parts[0].data[..], b"Hello");
        assert_eq!(parts[1].filename.as_deref(), Some("a.txt"));
        assert_eq!(parts[1].content_type.as_deref(), Some("text/plain"));
        assert_eq!(&parts[1].data[..], b"file body");
    }

    #[test]
    fn missing_boundary_yields_nothing() {
        let parts = parse_multipart("multipart/form-data", &Bytes::from_static(b"junk"));
        assert!(parts.is_empty());
    }
}
