//! Bulk import of comments exported from other services.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use tracing::{debug, info, warn};

use crate::store::{CommentStore, Mode, NewComment, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("malformed export: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid timestamp `{value}`")]
    Date { value: String },
}

/// What an import added to the store.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ImportSummary {
    pub threads: usize,
    pub comments: usize,
}

/// Loads an export document into a [`CommentStore`].
pub trait MigrationImporter {
    fn import_from(&self, store: &dyn CommentStore, contents: &str) -> Result<ImportSummary, ImportError>;
}

// ── Disqus ────────────────────────────────────────────────────────────────────

/// The Disqus XML export.
///
/// `<thread dsq:id>` elements give each discussion's page link; `<post>`
/// elements reference their thread and, for replies, their parent post.
/// Deleted and spam posts are skipped. Replies to skipped or unknown posts are
/// kept as top-level comments.
#[derive(Clone, Copy, Debug, Default)]
pub struct Disqus;

#[derive(Debug, Default)]
struct Post {
    id: String,
    thread: String,
    parent: Option<String>,
    message: String,
    created: String,
    author: Option<String>,
    email: Option<String>,
    ip: Option<String>,
    deleted: bool,
    spam: bool,
}

/// Where the parser currently is, for routing text content.
enum Scope {
    Top,
    Thread { id: String, link: String },
    Post(Post),
}

impl MigrationImporter for Disqus {
    fn import_from(&self, store: &dyn CommentStore, contents: &str) -> Result<ImportSummary, ImportError> {
        let (threads, mut posts) = parse(contents)?;
        posts.retain(|p| !(p.deleted || p.spam));

        let mut dated = posts
            .into_iter()
            .map(|p| rfc3339(&p.created).map(|created| (created, p)))
            .collect::<Result<Vec<_>, _>>()?;
        dated.sort_by_key(|(created, _)| *created);

        let mut summary = ImportSummary::default();
        let mut seen = HashSet::new();
        // Disqus post id → (thread, new id).
        let mut ids: HashMap<String, (String, i64)> = HashMap::new();

        for (created, post) in dated {
            let Some(path) = threads.get(&post.thread) else {
                warn!(post = %post.id, thread = %post.thread, "post references an unknown thread");
                continue;
            };
            let parent = post
                .parent
                .as_ref()
                .and_then(|p| ids.get(p))
                .filter(|(thread, _)| thread == path)
                .map(|(_, id)| *id);

            let comment = store.add(path, NewComment {
                text: post.message,
                author: post.author,
                email: post.email,
                website: None,
                parent,
                remote_addr: post.ip,
                mode: Mode::Public,
                created: Some(created),
            })?;
            debug!(thread = %path, from = %post.id, to = comment.id, "imported post");

            ids.insert(post.id, (path.clone(), comment.id));
            if seen.insert(path.clone()) {
                summary.threads += 1;
            }
            summary.comments += 1;
        }

        info!(threads = summary.threads, comments = summary.comments, "disqus import finished");
        Ok(summary)
    }
}

/// Returns thread id → path, and every post in document order.
fn parse(contents: &str) -> Result<(HashMap<String, String>, Vec<Post>), ImportError> {
    let mut reader = Reader::from_str(contents);
    reader.config_mut().trim_text(true);

    let mut threads = HashMap::new();
    let mut posts = Vec::new();
    let mut scope = Scope::Top;
    // Local names of the open elements below the document root.
    let mut stack: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                enter(&mut scope, &stack, &name, &e)?;
                stack.push(name);
            }
            Event::Empty(e) => {
                let name = e.local_name().as_ref().to_vec();
                enter(&mut scope, &stack, &name, &e)?;
                stack.push(name);
                leave(&mut scope, &mut stack, &mut threads, &mut posts);
            }
            Event::End(_) => leave(&mut scope, &mut stack, &mut threads, &mut posts),
            Event::Text(t) => text(&mut scope, &stack, &t.unescape()?),
            Event::CData(c) => text(&mut scope, &stack, &String::from_utf8_lossy(&c)),
            Event::Eof => break,
            _ => {}
        }
    }

    let threads = threads.into_iter().map(|(id, link)| (id, link_path(&link))).collect();
    Ok((threads, posts))
}

/// `stack` does not yet include `name`.
fn enter(scope: &mut Scope, stack: &[Vec<u8>], name: &[u8], e: &BytesStart<'_>) -> Result<(), ImportError> {
    if stack.len() == 1 {
        match name {
            b"thread" => *scope = Scope::Thread { id: dsq_id(e)?.unwrap_or_default(), link: String::new() },
            b"post" => *scope = Scope::Post(Post { id: dsq_id(e)?.unwrap_or_default(), ..Post::default() }),
            _ => {}
        }
    } else if stack.len() == 2 {
        if let Scope::Post(post) = scope {
            match name {
                b"thread" => post.thread = dsq_id(e)?.unwrap_or_default(),
                b"parent" => post.parent = dsq_id(e)?,
                _ => {}
            }
        }
    }
    Ok(())
}

fn leave(
    scope: &mut Scope,
    stack: &mut Vec<Vec<u8>>,
    threads: &mut HashMap<String, String>,
    posts: &mut Vec<Post>,
) {
    stack.pop();
    if stack.len() != 1 {
        return;
    }
    match std::mem::replace(scope, Scope::Top) {
        Scope::Thread { id, link } => {
            threads.insert(id, link);
        }
        Scope::Post(post) => posts.push(post),
        Scope::Top => {}
    }
}

fn text(scope: &mut Scope, stack: &[Vec<u8>], value: &str) {
    let path: Vec<&[u8]> = stack.iter().skip(1).map(Vec::as_slice).collect();
    match (scope, path.as_slice()) {
        (Scope::Thread { link, .. }, [b"thread", b"link"]) => link.push_str(value),
        (Scope::Post(post), [b"post", field]) => match *field {
            b"message"   => post.message.push_str(value),
            b"createdAt" => post.created.push_str(value),
            b"ipAddress" => post.ip = Some(value.to_owned()),
            b"isDeleted" => post.deleted = value == "true",
            b"isSpam"    => post.spam = value == "true",
            _ => {}
        },
        (Scope::Post(post), [b"post", b"author", field]) => match *field {
            b"name"  => post.author = Some(value.to_owned()),
            b"email" => post.email = Some(value.to_owned()),
            _ => {}
        },
        _ => {}
    }
}

fn dsq_id(e: &BytesStart<'_>) -> Result<Option<String>, ImportError> {
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        if attr.key.as_ref() == b"dsq:id" {
            return Ok(Some(attr.unescape_value()?.into_owned()));
        }
    }
    Ok(None)
}

fn rfc3339(value: &str) -> Result<DateTime<Utc>, ImportError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| ImportError::Date { value: value.to_owned() })
}

/// `http://example.org/blog/post/?x#y` → `/blog/post/`.
fn link_path(link: &str) -> String {
    let rest = match link.split_once("://") {
        Some((_, rest)) => rest.find('/').map_or("/", |i| &rest[i..]),
        None => link,
    };
    let end = rest.find(['?', '#']).unwrap_or(rest.len());
    match &rest[..end] {
        "" => "/".to_owned(),
        path => path.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::FileStore;

    const EXPORT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<disqus xmlns="http://disqus.com" xmlns:dsq="http://disqus.com/disqus-internals">
  <category dsq:id="1"><forum>blog</forum><title>General</title></category>
  <thread dsq:id="10">
    <forum>blog</forum>
    <category dsq:id="1"/>
    <link>http://example.org/blog/hello/</link>
    <title>Hello</title>
    <author><name>Owner</name></author>
  </thread>
  <thread dsq:id="11">
    <link>https://example.org/about?ref=feed</link>
  </thread>
  <post dsq:id="101">
    <message><![CDATA[Reply <b>first</b>]]></message>
    <createdAt>2013-01-02T10:00:00Z</createdAt>
    <isDeleted>false</isDeleted>
    <isSpam>false</isSpam>
    <author><email>bo@example.org</email><name>Bo</name></author>
    <ipAddress>192.0.2.2</ipAddress>
    <thread dsq:id="10"/>
    <parent dsq:id="100"/>
  </post>
  <post dsq:id="100">
    <message>First &amp; foremost</message>
    <createdAt>2013-01-01T10:00:00Z</createdAt>
    <isDeleted>false</isDeleted>
    <isSpam>false</isSpam>
    <author><name>Al</name></author>
    <thread dsq:id="10"/>
  </post>
  <post dsq:id="102">
    <message>buy now</message>
    <createdAt>2013-01-03T10:00:00Z</createdAt>
    <isSpam>true</isSpam>
    <thread dsq:id="11"/>
  </post>
  <post dsq:id="103">
    <message>reply to spam</message>
    <createdAt>2013-01-04T10:00:00Z</createdAt>
    <thread dsq:id="11"/>
    <parent dsq:id="102"/>
  </post>
</disqus>"#;

    #[test]
    fn imports_threads_in_creation_order() {
        let store = FileStore::in_memory().unwrap();
        let summary = Disqus.import_from(&store, EXPORT).unwrap();
        assert_eq!(summary, ImportSummary { threads: 2, comments: 3 });

        let hello = store.retrieve("/blog/hello/", &[Mode::Public]).unwrap();
        assert_eq!(hello.len(), 2);
        assert_eq!(hello[0].text, "First & foremost");
        assert_eq!(hello[0].author.as_deref(), Some("Al"));
        assert_eq!(hello[1].text, "Reply <b>first</b>");
        assert_eq!(hello[1].parent, Some(hello[0].id));
        assert_eq!(hello[1].email.as_deref(), Some("bo@example.org"));
        assert_eq!(hello[1].remote_addr.as_deref(), Some("192.0.2.2"));
        assert_eq!(hello[1].created.to_rfc3339(), "2013-01-02T10:00:00+00:00");

        let about = store.retrieve("/about", &[Mode::Public]).unwrap();
        assert_eq!(about.len(), 1);
        assert_eq!(about[0].parent, None);
    }

    #[test]
    fn bad_dates_and_xml_are_reported() {
        let store = FileStore::in_memory().unwrap();
        let doc = r#"<disqus><thread dsq:id="1"><link>http://x/</link></thread>
            <post dsq:id="2"><createdAt>yesterday</createdAt><thread dsq:id="1"/></post></disqus>"#;
        assert!(matches!(Disqus.import_from(&store, doc), Err(ImportError::Date { .. })));
        assert!(matches!(Disqus.import_from(&store, "<disqus><post></disqus>"), Err(ImportError::Xml(_))));
    }

    #[test]
    fn links_become_paths() {
        assert_eq!(link_path("http://example.org/a/b/"), "/a/b/");
        assert_eq!(link_path("https://example.org"), "/");
        assert_eq!(link_path("https://example.org/p?x=1#c"), "/p");
        assert_eq!(link_path("/already/a/path"), "/already/a/path");
    }
}
