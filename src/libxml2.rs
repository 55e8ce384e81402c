//! LibXML2 FFI wrapper for XML Schema validation and OASIS catalog lookup.
//!
//! ## Thread Safety Strategy
//!
//! According to the libxml2 threading notes, validating different documents against
//! a parsed schema is thread-safe, and so are catalog lookups. Schema *parsing* is
//! not, so every schema parse runs behind [`SCHEMA_PARSE_LOCK`].
//!
//! - **Schema parsing**: serialized; the catalog hook is armed only for that thread
//! - **Validation**: parallel, each call creates its own validation context
//! - **Schema sharing**: `Arc`-wrapped pointers shared read-only across threads
//!
//! ## Identifier resolution
//!
//! libxml2 loads every external resource through one process-wide entity loader.
//! [`install_entity_loader`] replaces it with [`catalog_entity_loader`], which
//! consults the [`CatalogResolver`] armed on the current thread by
//! [`with_resolution_scope`] and otherwise defers to the loader it replaced.

use std::cell::RefCell;
use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::{Arc, Mutex, MutexGuard, Once, OnceLock};

use libc::{c_char, c_int, c_void};
use tracing::debug;

use crate::catalog::{CatalogLookup, CatalogResolver, ResourceIdentifier};
use crate::diagnostics::{DiagnosticListener, DiagnosticLocation, Severity};
use crate::error::{Error, LibXml2Error, LibXml2Result};

/// Global initialization flag for libxml2
static LIBXML2_INIT: Once = Once::new();

/// Serializes schema parsing, which libxml2 does not support concurrently
static SCHEMA_PARSE_LOCK: Mutex<()> = Mutex::new(());

/// Loader that was active before ours was installed
static DEFAULT_ENTITY_LOADER: OnceLock<XmlExternalEntityLoader> = OnceLock::new();

/// Refuse network access while parsing
pub const XML_PARSE_NONET: c_int = 1 << 11;

/// libxml2 `xmlCatalogPrefer` values
const XML_CATA_PREFER_PUBLIC: c_int = 1;
const XML_CATA_PREFER_SYSTEM: c_int = 2;

/// libxml2 `xmlErrorLevel` values
const XML_ERR_WARNING: c_int = 1;
const XML_ERR_FATAL: c_int = 3;

// Opaque libxml2 structures
#[repr(C)]
pub struct XmlSchema {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaParserCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlSchemaValidCtxt {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlDoc {
    _private: [u8; 0],
}

#[repr(C)]
pub struct XmlCatalogData {
    _private: [u8; 0],
}

#[repr(C)]
pub struct xmlError {
    pub domain: c_int,
    pub code: c_int,
    pub message: *const c_char,
    pub level: c_int,
    pub file: *const c_char,
    pub line: c_int,
    pub str1: *const c_char,
    pub str2: *const c_char,
    pub str3: *const c_char,
    pub int1: c_int,
    pub int2: c_int,
    pub ctxt: *mut c_void,
    pub node: *mut c_void,
}

pub type XmlStructuredErrorFunc =
    Option<unsafe extern "C" fn(user_data: *mut c_void, error: *const xmlError)>;

/// `xmlParserInputPtr (*)(const char *URL, const char *ID, xmlParserCtxtPtr)`
pub type XmlExternalEntityLoader = Option<
    unsafe extern "C" fn(url: *const c_char, id: *const c_char, ctxt: *mut c_void) -> *mut c_void,
>;

// External libxml2 FFI declarations
#[cfg_attr(target_os = "windows", link(name = "libxml2"))]
#[cfg_attr(not(target_os = "windows"), link(name = "xml2"))]
unsafe extern "C" {
    pub fn xmlInitParser();
    pub fn xmlInitGlobals();

    // Documents
    pub fn xmlReadMemory(
        buffer: *const c_char,
        size: c_int,
        url: *const c_char,
        encoding: *const c_char,
        options: c_int,
    ) -> *mut XmlDoc;
    pub fn xmlFreeDoc(doc: *mut XmlDoc);
    pub fn xmlSetStructuredErrorFunc(ctx: *mut c_void, handler: XmlStructuredErrorFunc);

    // Schema parsing
    pub fn xmlSchemaNewDocParserCtxt(doc: *mut XmlDoc) -> *mut XmlSchemaParserCtxt;
    pub fn xmlSchemaSetParserStructuredErrors(
        ctxt: *mut XmlSchemaParserCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaParse(ctxt: *mut XmlSchemaParserCtxt) -> *mut XmlSchema;
    pub fn xmlSchemaFreeParserCtxt(ctxt: *mut XmlSchemaParserCtxt);
    pub fn xmlSchemaFree(schema: *mut XmlSchema);

    // Schema validation
    pub fn xmlSchemaNewValidCtxt(schema: *mut XmlSchema) -> *mut XmlSchemaValidCtxt;
    pub fn xmlSchemaFreeValidCtxt(ctxt: *mut XmlSchemaValidCtxt);
    pub fn xmlSchemaSetValidStructuredErrors(
        ctxt: *mut XmlSchemaValidCtxt,
        serror: XmlStructuredErrorFunc,
        ctx: *mut c_void,
    );
    pub fn xmlSchemaValidateDoc(ctxt: *mut XmlSchemaValidCtxt, doc: *mut XmlDoc) -> c_int;

    // Entity loading
    pub fn xmlSetExternalEntityLoader(f: XmlExternalEntityLoader);
    pub fn xmlGetExternalEntityLoader() -> XmlExternalEntityLoader;
    pub fn xmlNoNetExternalEntityLoader(
        url: *const c_char,
        id: *const c_char,
        ctxt: *mut c_void,
    ) -> *mut c_void;

    // Catalogs
    pub fn xmlLoadACatalog(filename: *const c_char) -> *mut XmlCatalogData;
    pub fn xmlFreeCatalog(catalog: *mut XmlCatalogData);
    pub fn xmlACatalogResolve(
        catalog: *mut XmlCatalogData,
        pub_id: *const c_char,
        sys_id: *const c_char,
    ) -> *mut c_char;
    pub fn xmlACatalogResolveURI(catalog: *mut XmlCatalogData, uri: *const c_char)
    -> *mut c_char;
    pub fn xmlCatalogSetDefaultPrefer(prefer: c_int) -> c_int;
}

/// Forwards libxml2 structured errors to a [`DiagnosticListener`].
///
/// `user_data` must point at a live `&mut dyn DiagnosticListener`.
unsafe extern "C" fn structured_error_callback(user_data: *mut c_void, error: *const xmlError) {
    if user_data.is_null() || error.is_null() {
        return;
    }
    let listener = unsafe { &mut *(user_data as *mut &mut dyn DiagnosticListener) };
    let error = unsafe { &*error };

    let Some(message) = (unsafe { c_string(error.message) }) else {
        return;
    };
    let severity = match error.level {
        XML_ERR_WARNING => Severity::Warning,
        XML_ERR_FATAL => Severity::Fatal,
        _ => Severity::Error,
    };
    let location = DiagnosticLocation {
        system_id: unsafe { c_string(error.file) },
        line: u32::try_from(error.line).ok().filter(|line| *line > 0),
        column: u32::try_from(error.int2).ok().filter(|column| *column > 0),
    };

    listener.report(severity, message.trim(), &location);
}

unsafe fn c_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        None
    } else {
        Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
    }
}

fn to_c_string(value: &str) -> LibXml2Result<CString> {
    CString::new(value).map_err(|_| LibXml2Error::InvalidPath {
        path: value.to_string(),
    })
}

/// Thread-safe wrapper for a parsed schema and the document it was built from
#[derive(Debug, Clone)]
pub struct XmlSchemaPtr {
    inner: Arc<XmlSchemaInner>,
}

#[derive(Debug)]
struct XmlSchemaInner {
    ptr: *mut XmlSchema,
    doc: *mut XmlDoc,
    _phantom: PhantomData<XmlSchema>,
}

// Safety: parsed xmlSchema structures are read-only during validation
unsafe impl Send for XmlSchemaInner {}
unsafe impl Sync for XmlSchemaInner {}

impl XmlSchemaPtr {
    /// # Safety
    ///
    /// `ptr` must come from `xmlSchemaParse` and `doc` from the parser that fed it;
    /// both are owned by the returned value from now on.
    unsafe fn from_raw(ptr: *mut XmlSchema, doc: *mut XmlDoc) -> Self {
        XmlSchemaPtr {
            inner: Arc::new(XmlSchemaInner {
                ptr,
                doc,
                _phantom: PhantomData,
            }),
        }
    }

    fn as_ptr(&self) -> *mut XmlSchema {
        self.inner.ptr
    }
}

impl Drop for XmlSchemaInner {
    fn drop(&mut self) {
        // The schema may point into the document, so it goes first.
        unsafe {
            if !self.ptr.is_null() {
                xmlSchemaFree(self.ptr);
            }
            if !self.doc.is_null() {
                xmlFreeDoc(self.doc);
            }
        }
    }
}

/// Owned parsed document
#[derive(Debug)]
pub struct XmlDocument {
    ptr: *mut XmlDoc,
}

impl Drop for XmlDocument {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            unsafe { xmlFreeDoc(self.ptr) };
        }
    }
}

/// Safe entry points into libxml2
#[derive(Debug, Clone, Copy)]
pub struct LibXml2Wrapper {
    _phantom: PhantomData<()>,
}

impl LibXml2Wrapper {
    /// Initializes libxml2 and the catalog entity loader exactly once.
    pub fn new() -> Self {
        LIBXML2_INIT.call_once(|| unsafe {
            xmlInitParser();
            xmlInitGlobals();
        });
        install_entity_loader();

        LibXml2Wrapper {
            _phantom: PhantomData,
        }
    }

    /// Parse `content` as a document whose base URI is `base_url`.
    ///
    /// Parser diagnostics go to `listener`. `Ok(None)` means the document was not
    /// well-formed and the reason has been reported.
    pub fn read_document(
        &self,
        content: &[u8],
        base_url: &str,
        options: c_int,
        listener: &mut dyn DiagnosticListener,
    ) -> LibXml2Result<Option<XmlDocument>> {
        let size = c_int::try_from(content.len()).map_err(|_| LibXml2Error::DocumentParseFailed {
            file: base_url.to_string(),
        })?;
        let c_url = to_c_string(base_url)?;

        let mut listener = listener;
        let listener_ptr = &mut listener as *mut &mut dyn DiagnosticListener as *mut c_void;

        let doc = unsafe {
            // The generic error handler is per thread in libxml2.
            xmlSetStructuredErrorFunc(listener_ptr, Some(structured_error_callback));
            let doc = xmlReadMemory(
                content.as_ptr() as *const c_char,
                size,
                c_url.as_ptr(),
                ptr::null(),
                options,
            );
            xmlSetStructuredErrorFunc(ptr::null_mut(), None);
            doc
        };

        if doc.is_null() {
            return Ok(None);
        }
        Ok(Some(XmlDocument { ptr: doc }))
    }

    /// Parse a schema from `content` (base URI `base_url`), reporting every
    /// diagnostic to `listener`.
    ///
    /// Includes and imports are loaded through the process entity loader, so callers
    /// wanting catalog resolution run this inside [`with_resolution_scope`].
    /// `Ok(None)` means parsing failed and the diagnostics say why.
    pub fn parse_schema(
        &self,
        content: &[u8],
        base_url: &str,
        listener: &mut dyn DiagnosticListener,
    ) -> LibXml2Result<Option<XmlSchemaPtr>> {
        let _guard = schema_parse_guard();

        let Some(document) = self.read_document(content, base_url, 0, &mut *listener)? else {
            return Ok(None);
        };

        let mut listener = listener;
        let listener_ptr = &mut listener as *mut &mut dyn DiagnosticListener as *mut c_void;

        unsafe {
            let parser_ctxt = xmlSchemaNewDocParserCtxt(document.ptr);
            if parser_ctxt.is_null() {
                return Err(LibXml2Error::MemoryAllocation);
            }
            xmlSchemaSetParserStructuredErrors(
                parser_ctxt,
                Some(structured_error_callback),
                listener_ptr,
            );
            xmlSetStructuredErrorFunc(listener_ptr, Some(structured_error_callback));

            let schema = xmlSchemaParse(parser_ctxt);

            xmlSetStructuredErrorFunc(ptr::null_mut(), None);
            xmlSchemaFreeParserCtxt(parser_ctxt);

            if schema.is_null() {
                return Ok(None);
            }

            // Ownership of the document moves into the schema handle.
            let doc = document.ptr;
            std::mem::forget(document);
            Ok(Some(XmlSchemaPtr::from_raw(schema, doc)))
        }
    }

    /// Validate a parsed document. Thread-safe; each call owns its context.
    pub fn validate_document(
        &self,
        schema: &XmlSchemaPtr,
        document: &XmlDocument,
        listener: &mut dyn DiagnosticListener,
    ) -> LibXml2Result<()> {
        let mut listener = listener;
        let listener_ptr = &mut listener as *mut &mut dyn DiagnosticListener as *mut c_void;

        unsafe {
            let valid_ctxt = xmlSchemaNewValidCtxt(schema.as_ptr());
            if valid_ctxt.is_null() {
                return Err(LibXml2Error::ValidationContextCreationFailed);
            }
            xmlSchemaSetValidStructuredErrors(
                valid_ctxt,
                Some(structured_error_callback),
                listener_ptr,
            );

            let code = xmlSchemaValidateDoc(valid_ctxt, document.ptr);
            xmlSchemaFreeValidCtxt(valid_ctxt);

            if code < 0 {
                return Err(LibXml2Error::DocumentParseFailed {
                    file: format!("internal validation error {}", code),
                });
            }
        }
        Ok(())
    }
}

impl Default for LibXml2Wrapper {
    fn default() -> Self {
        Self::new()
    }
}

fn schema_parse_guard() -> MutexGuard<'static, ()> {
    // The lock guards no data, so a poisoned lock is still usable.
    SCHEMA_PARSE_LOCK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// OASIS XML catalogs loaded through libxml2
pub struct XmlCatalog {
    catalogs: Vec<(PathBuf, *mut XmlCatalogData)>,
}

// Safety: libxml2 catalog lookups are thread-safe; the handles are never mutated
unsafe impl Send for XmlCatalog {}
unsafe impl Sync for XmlCatalog {}

impl XmlCatalog {
    /// Load every catalog file, in order. Lookups consult them in the same order.
    pub fn load(paths: &[PathBuf], prefer_public: bool) -> LibXml2Result<Self> {
        LibXml2Wrapper::new();
        unsafe {
            xmlCatalogSetDefaultPrefer(if prefer_public {
                XML_CATA_PREFER_PUBLIC
            } else {
                XML_CATA_PREFER_SYSTEM
            });
        }

        let mut catalogs = Vec::with_capacity(paths.len());
        for path in paths {
            if !path.is_file() {
                return Err(LibXml2Error::CatalogLoadFailed { path: path.clone() });
            }
            let c_path = path
                .to_str()
                .ok_or_else(|| LibXml2Error::InvalidPath {
                    path: path.display().to_string(),
                })
                .and_then(to_c_string)?;

            let catalog = unsafe { xmlLoadACatalog(c_path.as_ptr()) };
            if catalog.is_null() {
                return Err(LibXml2Error::CatalogLoadFailed { path: path.clone() });
            }
            debug!(catalog = %path.display(), "loaded XML catalog");
            catalogs.push((path.clone(), catalog));
        }

        Ok(Self { catalogs })
    }

    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.catalogs.iter().map(|(path, _)| path.as_path())
    }
}

impl CatalogLookup for XmlCatalog {
    fn resolve<'a>(
        &self,
        public_id: Option<&'a str>,
        system_id: Option<&'a str>,
    ) -> Option<String> {
        let public_id = public_id.and_then(|id| CString::new(id).ok());
        let system_id = system_id.and_then(|id| CString::new(id).ok());
        if public_id.is_none() && system_id.is_none() {
            return None;
        }

        self.catalogs.iter().find_map(|(_, catalog)| unsafe {
            take_xml_string(xmlACatalogResolve(
                *catalog,
                public_id.as_ref().map_or(ptr::null(), |id| id.as_ptr()),
                system_id.as_ref().map_or(ptr::null(), |id| id.as_ptr()),
            ))
        })
    }

    fn resolve_uri(&self, uri: &str) -> Option<String> {
        let uri = CString::new(uri).ok()?;
        self.catalogs
            .iter()
            .find_map(|(_, catalog)| unsafe {
                take_xml_string(xmlACatalogResolveURI(*catalog, uri.as_ptr()))
            })
    }
}

impl Drop for XmlCatalog {
    fn drop(&mut self) {
        for (_, catalog) in self.catalogs.drain(..) {
            unsafe { xmlFreeCatalog(catalog) };
        }
    }
}

/// Copy and release a string libxml2 allocated with its default allocator
unsafe fn take_xml_string(ptr: *mut c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    let value = unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned();
    unsafe { libc::free(ptr as *mut c_void) };
    Some(value)
}

/// Per-thread resolution state while a schema set is parsed
struct ResolutionScope {
    resolver: CatalogResolver,
    /// Target namespace expected at each schema location, `None` for no-namespace
    /// schemas
    namespaces: HashMap<String, Option<String>>,
    failure: Option<Error>,
}

thread_local! {
    static RESOLUTION_SCOPE: RefCell<Option<ResolutionScope>> = const { RefCell::new(None) };
}

/// Route entity loads on this thread through `resolver` while `f` runs.
///
/// `namespaces` maps schema locations to the namespace they are expected to
/// define. Locations missing from it are identified by their own URL. Returns
/// `f`'s value and the first resolution failure, if any.
pub fn with_resolution_scope<T>(
    resolver: &CatalogResolver,
    namespaces: HashMap<String, Option<String>>,
    f: impl FnOnce() -> T,
) -> (T, Option<Error>) {
    RESOLUTION_SCOPE.with(|scope| {
        *scope.borrow_mut() = Some(ResolutionScope {
            resolver: resolver.clone(),
            namespaces,
            failure: None,
        });
    });

    let value = f();

    let failure = RESOLUTION_SCOPE.with(|scope| {
        scope
            .borrow_mut()
            .take()
            .and_then(|scope| scope.failure)
    });
    (value, failure)
}

fn install_entity_loader() {
    DEFAULT_ENTITY_LOADER.get_or_init(|| unsafe {
        let previous = xmlGetExternalEntityLoader();
        xmlSetExternalEntityLoader(Some(catalog_entity_loader));
        previous
    });
}

enum LoadDecision {
    Default,
    Refuse,
    Load {
        location: Option<String>,
        allow_remote: bool,
    },
}

unsafe extern "C" fn catalog_entity_loader(
    url: *const c_char,
    id: *const c_char,
    ctxt: *mut c_void,
) -> *mut c_void {
    let system_id = unsafe { c_string(url) };
    let public_id = unsafe { c_string(id) };

    let decision = RESOLUTION_SCOPE.with(|scope| {
        let Ok(mut scope) = scope.try_borrow_mut() else {
            return LoadDecision::Default;
        };
        let Some(scope) = scope.as_mut() else {
            return LoadDecision::Default;
        };

        let namespace = system_id.as_ref().and_then(|url| {
            scope
                .namespaces
                .get(url)
                .cloned()
                .unwrap_or_else(|| Some(url.clone()))
        });
        let identifier = ResourceIdentifier {
            namespace,
            public_id: public_id.clone(),
            literal_system_id: system_id.clone(),
            expanded_system_id: system_id.clone(),
        };

        match scope.resolver.resolve_identifier(&identifier) {
            Ok(resolution) => LoadDecision::Load {
                location: resolution.location().map(str::to_string),
                allow_remote: scope.resolver.policy().allow_remote_resources(),
            },
            Err(error) => {
                scope.failure.get_or_insert(error);
                LoadDecision::Refuse
            }
        }
    });

    let default_loader = DEFAULT_ENTITY_LOADER.get().copied().flatten();
    match decision {
        LoadDecision::Default => match default_loader {
            Some(loader) => unsafe { loader(url, id, ctxt) },
            None => ptr::null_mut(),
        },
        LoadDecision::Refuse => ptr::null_mut(),
        LoadDecision::Load {
            location,
            allow_remote,
        } => {
            let location = location.and_then(|location| CString::new(location).ok());
            let target = location.as_ref().map_or(url, |location| location.as_ptr());
            match default_loader {
                Some(loader) if allow_remote => unsafe { loader(target, id, ctxt) },
                _ => unsafe { xmlNoNetExternalEntityLoader(target, id, ctxt) },
            }
        }
    }
}
