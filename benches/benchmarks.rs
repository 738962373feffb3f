use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use std::collections::HashMap;
use url::Url;

use site_mirror::html_parser::css_url_references;
use site_mirror::{CanonicalUrl, HtmlParser, PathMapper, ResourceCategory, ScopeFilter};

const PAGE: &str = r#"
    <html>
        <head>
            <link rel="stylesheet" href="/style.css">
            <script src="/script.js"></script>
            <link rel="stylesheet" href="/theme.css?ver=6.4">
            <script src="/utils.js"></script>
        </head>
        <body>
            <img src="/logo.png" alt="Logo">
            <img src="/wp-content/uploads/2023/05/banner.jpg" srcset="/img/banner-480.jpg 480w, /img/banner-960.jpg 960w">
            <div style="background-image: url('/img/hero.jpg')"></div>
            <a href="/about">About</a>
            <a href="/contact">Contact</a>
            <a href="/products/">Products</a>
            <a href="https://other.com/">Elsewhere</a>
        </body>
    </html>
"#;

fn parser() -> HtmlParser {
    let page_url = Url::parse("https://example.com/").unwrap();
    let scope = ScopeFilter::for_start_url(&page_url, &[]);
    HtmlParser::new(&page_url, &scope, "wp-content")
}

fn bench_canonicalization(c: &mut Criterion) {
    let urls = [
        "https://Example.com/catalog/",
        "https://example.com/catalog?page=2#top",
        "https://example.com:8443/wp-content/uploads/2023/05/door.jpg",
        "http://example.com",
        "not a url at all",
    ];

    c.bench_function("canonicalize_urls", |b| {
        b.iter(|| {
            for url in &urls {
                let _canonical = CanonicalUrl::parse(black_box(url));
            }
        });
    });
}

fn bench_path_mapping(c: &mut Criterion) {
    let urls: Vec<(CanonicalUrl, ResourceCategory)> = [
        ("https://example.com/", ResourceCategory::HtmlPage),
        ("https://example.com/catalog/barn-doors", ResourceCategory::HtmlPage),
        ("https://example.com/about.php", ResourceCategory::HtmlPage),
        ("https://example.com/wp-content/uploads/2023/05/door.jpg", ResourceCategory::UploadedMedia),
        ("https://example.com/assets/style.css", ResourceCategory::Stylesheet),
        ("https://example.com/home/hero.jpg", ResourceCategory::Image),
        ("https://example.com/about/hero.jpg", ResourceCategory::Image),
    ]
    .iter()
    .map(|(url, category)| (CanonicalUrl::parse(url), *category))
    .collect();

    c.bench_function("map_paths", |b| {
        b.iter(|| {
            let mapper = PathMapper::new("wp-content");
            for (url, category) in &urls {
                let _path = mapper.map_path(black_box(url), *category);
            }
        });
    });
}

fn bench_page_rewriting(c: &mut Criterion) {
    let parser = parser();

    c.bench_function("extract_page_references", |b| {
        b.iter(|| {
            let _extracted = parser.extract_references(black_box(PAGE.as_bytes()));
        });
    });

    let resolved: HashMap<CanonicalUrl, String> = parser
        .extract_references(PAGE.as_bytes())
        .assets
        .iter()
        .map(|request| {
            let canonical = CanonicalUrl::from_url(&request.url);
            let path = format!("{}/{}", request.category.directory(), canonical.file_name().unwrap_or("index"));
            (canonical, path)
        })
        .collect();
    let known = |_: &CanonicalUrl| -> Option<String> { None };

    c.bench_function("rewrite_page", |b| {
        b.iter(|| {
            let _html = parser.rewrite(black_box(PAGE.as_bytes()), "index.html", &resolved, &known);
        });
    });
}

fn bench_css_scanning(c: &mut Criterion) {
    let css = r#"
        @font-face { font-family: Inter; src: url('../fonts/inter.woff2') format('woff2'); }
        .hero { background: url(/img/hero.jpg) no-repeat center; }
        .icon { background-image: url("data:image/svg+xml;base64,PHN2Zz4="); }
        .banner { background: url( "/img/banner.png" ); }
    "#;

    c.bench_function("css_url_references", |b| {
        b.iter(|| {
            let _refs = css_url_references(black_box(css));
        });
    });
}

criterion_group!(
    benches,
    bench_canonicalization,
    bench_path_mapping,
    bench_page_rewriting,
    bench_css_scanning
);
criterion_main!(benches);
