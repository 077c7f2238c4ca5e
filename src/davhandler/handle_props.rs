use std::io::Write;

use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};
use xml::writer::{EventWriter, XmlEvent};
use xmltree::Element;

use super::{Ctx, Target};
use crate::body::Body;
use crate::davheaders::Depth;
use crate::errors::DavError;
use crate::store::{NewProperty, Owner, PropName, Property, DAV_NS};
use crate::util::MemBuffer;
use crate::xmltree_ext::{
    dav_text_elem, emitter, end, fragment_of, parse_xml, start_dav, start_prop, write_fragment,
    ElementExt,
};
use crate::DavResult;

// what a PROPFIND asks for.
enum PropfindRequest {
    AllProp,
    PropName,
    Prop(Vec<PropName>),
}

// request bodies must be xml, if they say what they are.
fn check_xml_content_type(req: &Request<()>) -> DavResult<()> {
    let Some(ct) = req.headers().get(http::header::CONTENT_TYPE) else {
        return Ok(());
    };
    let ct = ct.to_str().map_err(|_| DavError::UnsupportedMediaType)?;
    let essence = ct.split(';').next().unwrap_or("").trim();
    if essence.eq_ignore_ascii_case("application/xml") || essence.eq_ignore_ascii_case("text/xml") {
        Ok(())
    } else {
        debug!("refusing request body of type {ct}");
        Err(DavError::UnsupportedMediaType)
    }
}

// the name of a property element. An unnamespaced name with a colon is
// an unbound prefix.
fn prop_name(elem: &Element) -> DavResult<PropName> {
    if elem.namespace.is_none() && elem.name.contains(':') {
        return Err(DavError::malformed(format!(
            "invalid property name {}",
            elem.name
        )));
    }
    Ok(PropName::new(
        elem.namespace.clone().unwrap_or_default(),
        elem.name.clone(),
    ))
}

fn parse_propfind(body: &[u8]) -> DavResult<PropfindRequest> {
    let root = parse_xml(body)?;
    if !root.is_dav("propfind") {
        return Err(DavError::malformed("expected DAV:propfind"));
    }
    if root.dav_child("allprop").is_some() {
        return Ok(PropfindRequest::AllProp);
    }
    if root.dav_child("propname").is_some() {
        return Ok(PropfindRequest::PropName);
    }
    if let Some(prop) = root.dav_child("prop") {
        let names = prop
            .child_elems_iter()
            .map(prop_name)
            .collect::<DavResult<Vec<_>>>()?;
        return Ok(PropfindRequest::Prop(names));
    }
    Err(DavError::malformed("expected allprop, propname or prop"))
}

// one <propstat> holding `props`, with or without their values.
fn write_propstat<W: Write>(
    emitter: &mut EventWriter<W>,
    props: &[Property],
    names_only: bool,
) -> DavResult<()> {
    start_dav(emitter, "propstat")?;
    start_dav(emitter, "prop")?;
    for p in props {
        if names_only {
            start_prop(emitter, &p.name.namespace, &p.name.local_name, &[])?;
        } else {
            start_prop(emitter, &p.name.namespace, &p.name.local_name, &p.attributes)?;
            write_fragment(emitter, &p.content)?;
        }
        end(emitter)?;
    }
    end(emitter)?;
    dav_text_elem(emitter, "status", "HTTP/1.1 200 OK")?;
    end(emitter)
}

fn write_missing<W: Write>(emitter: &mut EventWriter<W>, missing: &[&PropName]) -> DavResult<()> {
    start_dav(emitter, "propstat")?;
    start_dav(emitter, "prop")?;
    for name in missing {
        start_prop(emitter, &name.namespace, &name.local_name, &[])?;
        end(emitter)?;
    }
    end(emitter)?;
    dav_text_elem(emitter, "status", "HTTP/1.1 404 Not Found")?;
    end(emitter)
}

impl crate::DavHandler {
    // Depth: header of a PROPFIND, as a number of levels.
    fn propfind_depth(&self, req: &Request<()>) -> DavResult<u32> {
        let depth = req
            .headers()
            .typed_try_get::<Depth>()
            .map_err(|_| DavError::malformed("bad Depth header"))?
            .unwrap_or(Depth::Infinity);
        match depth {
            Depth::Zero => Ok(0),
            Depth::One => Ok(1),
            Depth::Infinity => self
                .propfind_infinity
                .ok_or(DavError::Conflict("Depth: infinity is not supported")),
        }
    }

    pub(crate) fn handle_propfind(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let node = target.found()?;
        let depth = self.propfind_depth(ctx.req)?;

        let request = if ctx.body.is_empty() {
            PropfindRequest::AllProp
        } else {
            check_xml_content_type(ctx.req)?;
            parse_propfind(ctx.body)?
        };
        let filters = match request {
            PropfindRequest::Prop(ref names) => Some(names.as_slice()),
            _ => None,
        };

        let found = ctx.props().query(&node, Some(depth), filters)?;
        debug!("propfind {} depth {}: {} nodes", ctx.path, depth, found.len());

        let mut emitter = emitter(MemBuffer::new())?;
        emitter.write(XmlEvent::start_element("D:multistatus").ns("D", DAV_NS))?;
        for (full_path, props) in &found {
            start_dav(&mut emitter, "response")?;
            dav_text_elem(&mut emitter, "href", &self.href(full_path))?;
            match request {
                PropfindRequest::AllProp => write_propstat(&mut emitter, props, false)?,
                PropfindRequest::PropName => write_propstat(&mut emitter, props, true)?,
                PropfindRequest::Prop(ref expected) => {
                    if !props.is_empty() {
                        write_propstat(&mut emitter, props, false)?;
                    }
                    let missing: Vec<&PropName> = expected
                        .iter()
                        .filter(|name| !props.iter().any(|p| &p.name == *name))
                        .collect();
                    if !missing.is_empty() {
                        write_missing(&mut emitter, &missing)?;
                    }
                }
            }
            end(&mut emitter)?;
        }
        end(&mut emitter)?;

        let body = emitter.into_inner().take();
        let mut res = Response::new(Body::from(body));
        *res.status_mut() = StatusCode::MULTI_STATUS;
        res.headers_mut().insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        Ok(res)
    }

    pub(crate) fn handle_proppatch(&self, ctx: &Ctx<'_>, target: Target) -> DavResult<Response<Body>> {
        let node = target.found()?;
        ctx.validate_lock(&node, false)?;

        check_xml_content_type(ctx.req)?;
        if ctx.body.is_empty() {
            return Err(DavError::UnsupportedMediaType);
        }
        let root = parse_xml(ctx.body)?;
        if !root.is_dav("propertyupdate") {
            return Err(DavError::UnsupportedMediaType);
        }

        // instructions apply in document order.
        let owner = Owner::Path(node.id.clone());
        let props = ctx.props();
        for instruction in root.child_elems_iter() {
            let elems = instruction
                .child_elems_iter()
                .filter(|e| e.is_dav("prop"))
                .flat_map(|p| p.child_elems_iter());
            if instruction.is_dav("set") {
                let mut set = Vec::new();
                for elem in elems {
                    let mut attributes: Vec<(String, String)> = elem
                        .attributes
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    attributes.sort();
                    set.push(NewProperty {
                        name: prop_name(elem)?,
                        attributes,
                        content: fragment_of(&elem.children)?,
                    });
                }
                trace!("proppatch {}: set {} properties", ctx.path, set.len());
                props.set_many(&owner, true, &set)?;
            } else if instruction.is_dav("remove") {
                let names = elems.map(prop_name).collect::<DavResult<Vec<_>>>()?;
                trace!("proppatch {}: remove {} properties", ctx.path, names.len());
                props.remove_many(&owner, true, &names)?;
            } else {
                return Err(DavError::malformed(format!(
                    "unexpected instruction {}",
                    instruction.name
                )));
            }
        }

        let mut res = Response::new(Body::empty());
        *res.status_mut() = StatusCode::CREATED;
        Ok(res)
    }
}
